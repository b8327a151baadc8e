//! Process-wide device registry (§4.9): allow-listed instantiation,
//! lookup, restore-or-seed. The map is read-mostly; entries are only ever
//! added, and the `Mutex` around insertion serialises first-reference races
//! without needing any locking once a device's own worker task takes over.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use rumqttc::AsyncClient;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info};

use crate::device::{Device, DeviceEvent, DeviceView};
use crate::plant::PlantCatalog;

const DEVICE_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device {0} is not on the allow-list")]
    NotAllowed(String),
}

/// What the registry hands back for a live device: the event queue
/// producers use to reach it, and a `watch` channel for the latest
/// `DeviceView` (read by the HTTP layer without touching the worker queue).
#[derive(Clone)]
pub struct DeviceHandle {
    pub tx: mpsc::Sender<DeviceEvent>,
    pub view: watch::Receiver<DeviceView>,
}

struct Inner {
    allow_list: std::collections::HashSet<String>,
    timezone: String,
    sunrise_sec: i32,
    persist_dir: PathBuf,
    backup_count: usize,
    catalog: Arc<PlantCatalog>,
    mqtt: AsyncClient,
    devices: Mutex<HashMap<String, DeviceHandle>>,
}

/// Owns every live device for the process. Devices are created lazily on
/// first reference and never destroyed (process-lifetime, §3).
#[derive(Clone)]
pub struct Registry(Arc<Inner>);

impl Registry {
    pub fn new(
        allow_list: Vec<String>,
        timezone: String,
        sunrise_sec: i32,
        persist_dir: PathBuf,
        backup_count: usize,
        catalog: Arc<PlantCatalog>,
        mqtt: AsyncClient,
    ) -> Self {
        Registry(Arc::new(Inner {
            allow_list: allow_list.into_iter().collect(),
            timezone,
            sunrise_sec,
            persist_dir,
            backup_count,
            catalog,
            mqtt,
            devices: Mutex::new(HashMap::new()),
        }))
    }

    pub fn is_allowed(&self, id: &str) -> bool {
        self.0.allow_list.contains(id)
    }

    /// Returns the existing device's handle, or instantiates a new one
    /// (restoring from snapshot if present) when `id` is allow-listed and
    /// not yet known. Rejects IDs off the allow-list.
    pub async fn get_or_create(&self, id: &str) -> Result<DeviceHandle, RegistryError> {
        let mut devices = self.0.devices.lock().await;
        if let Some(handle) = devices.get(id) {
            return Ok(handle.clone());
        }
        if !self.0.allow_list.contains(id) {
            return Err(RegistryError::NotAllowed(id.to_string()));
        }

        let (tx, rx) = mpsc::channel(DEVICE_QUEUE_CAPACITY);
        let device = match Device::restore_or_seed(
            id.to_string(),
            &self.0.persist_dir,
            self.0.timezone.clone(),
            self.0.sunrise_sec,
            tx.clone(),
        ) {
            Ok(d) => d,
            Err(e) => {
                error!(device = %id, error = %e, "failed to restore device snapshot, seeding fresh");
                Device::new_default(id.to_string(), self.0.timezone.clone(), self.0.sunrise_sec, tx.clone())
            }
        };

        let (view_tx, view_rx) = watch::channel(device.view());
        let handle = DeviceHandle { tx, view: view_rx };
        devices.insert(id.to_string(), handle.clone());

        let mqtt = self.0.mqtt.clone();
        let persist_dir = self.0.persist_dir.clone();
        let backup_count = self.0.backup_count;
        let catalog = Arc::clone(&self.0.catalog);
        let device_id = id.to_string();
        tokio::spawn(async move {
            info!(device = %device_id, "device worker started");
            if let Err(e) = device.run(rx, mqtt, persist_dir, backup_count, catalog, view_tx).await {
                error!(device = %device_id, error = %e, "device worker stopped on fatal error");
            }
        });

        Ok(handle)
    }

    /// Existing devices only, for the HTTP layer: never implicitly creates.
    pub async fn get(&self, id: &str) -> Option<DeviceHandle> {
        self.0.devices.lock().await.get(id).cloned()
    }

    pub async fn known_device_ids(&self) -> Vec<String> {
        self.0.devices.lock().await.keys().cloned().collect()
    }
}
