//! Plantprism entry point: loads configuration, loads the plant catalog,
//! connects to the MQTT broker, and runs the device registry and the thin
//! HTTP view side by side until asked to stop.

mod config;
mod device;
mod ec;
mod messages;
mod mqtt;
mod observer;
mod persistence;
mod plant;
mod recipe;
mod registry;
mod replies;
mod router;
mod timers;
mod types;
mod tz;
mod value;
mod web;

use std::env;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use plant::PlantCatalog;
use registry::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = env::var("PLANTPRISM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    if cfg.devices.is_empty() {
        warn!("no devices on the allow-list — every inbound message will be dropped");
    }
    info!(devices = cfg.devices.len(), timezone = %cfg.timezone, "configuration loaded");

    let catalog = Arc::new(
        PlantCatalog::load(&cfg.plants_path)
            .with_context(|| format!("failed to load plant catalog {}", cfg.plants_path.display()))?,
    );
    info!(path = %cfg.plants_path.display(), "plant catalog loaded");

    let (mqtt_client, eventloop) = mqtt::connect(&cfg).context("mqtt connect")?;

    let registry = Registry::new(
        cfg.devices.clone(),
        cfg.timezone.clone(),
        cfg.sunrise_sec,
        cfg.persist_dir.clone(),
        cfg.backup_count,
        catalog,
        mqtt_client.clone(),
    );

    let mut mqtt_handle = {
        let registry = registry.clone();
        tokio::spawn(async move { mqtt::run(eventloop, mqtt_client, registry).await })
    };

    let mut web_handle = {
        let state = web::AppState {
            registry: registry.clone(),
            started_at: Arc::new(Instant::now()),
        };
        let addr = cfg.web_addr;
        tokio::spawn(async move { web::serve(addr, state).await })
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let exit_reason: &str;
    loop {
        tokio::select! {
            result = &mut mqtt_handle => {
                error!("CRITICAL: mqtt task exited unexpectedly: {result:?}");
                exit_reason = "mqtt task died";
                break;
            }
            result = &mut web_handle => {
                error!("web server task exited unexpectedly: {result:?}");
                // Not safety-critical: the MQTT side keeps serving devices.
            }
            _ = &mut ctrl_c => {
                exit_reason = "SIGINT";
                break;
            }
            _ = sigterm.recv() => {
                exit_reason = "SIGTERM";
                break;
            }
        }
    }

    // In-flight device saves are driven by each device's own worker task;
    // letting the process exit here only after the signal (rather than
    // killing those tasks ourselves) gives a best-effort chance for any
    // save already queued on a worker to complete before the runtime drops.
    warn!(reason = exit_reason, "shutting down");
    Ok(())
}
