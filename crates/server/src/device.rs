//! The per-device event engine (§4.5): a single-consumer queue serialises
//! every mutation to one device's state, so there is never a data race to
//! reason about, only an order of events.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::ec::EcController;
use crate::messages::{self, MessageError};
use crate::observer::{ObserverHub, SlotEvent, StatusSnapshot};
use crate::plant::{PlantCatalog, PlantError};
use crate::recipe::{LayerActiveness, Recipe, RecipeError, MIN_REGEN_AGE_SEC};
use crate::replies::{self, Reply, ReplyError};
use crate::router::{InboundEvent, Prefix};
use crate::timers::{DeviceTimers, WATERING_DELAY_AFTER_HARVEST, WATERING_DELAY_AFTER_PLANTING};
use crate::types::{DeviceMode, Layer, ValveState};
use crate::value::{Timestamp, TimestampedValue};

pub const NUM_SLOTS_PER_LAYER: usize = 9;
const DEFAULT_DAY_LENGTH_SEC: i32 = 12 * 3600;
const DEFAULT_LED_VALS: [u8; 4] = [0, 0, 0, 0];
const DEFAULT_TEMP_DAY_C: f64 = 20.0;
const DEFAULT_TEMP_NIGHT_C: f64 = 18.0;
const DEFAULT_WATER_TARGET: i16 = 0;
const DEFAULT_WATER_DELAY_SEC: i32 = 0;

fn now_unix() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as Timestamp
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("slot {0} already occupied")]
    SlotOccupied(usize),
    #[error("slot {0} is empty")]
    SlotEmpty(usize),
    #[error("slot index {0} out of range")]
    SlotOutOfRange(usize),
    #[error("client token mismatch: expected {expected:?}, got {got:?}")]
    ClientTokenMismatch { expected: String, got: String },
    #[error("unhandled (prefix, event) combination")]
    UnhandledTopic,
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
    #[error("device worker has stopped")]
    Stopped,
    #[error(transparent)]
    Plant(#[from] PlantError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error(transparent)]
    Reply(#[from] ReplyError),
}

fn layer_index(layer: Layer) -> usize {
    match layer {
        Layer::A => 0,
        Layer::B => 1,
    }
}

/// A single growing slot: which plant (if any) occupies it, and the three
/// lifecycle deadlines derived from the plant catalog at planting time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub plant_id: i64,
    pub planting_time: Timestamp,
    pub germinated_by: Timestamp,
    pub harvest_from: Timestamp,
    pub harvest_by: Timestamp,
}

impl Slot {
    pub const EMPTY: Slot = Slot {
        plant_id: 0,
        planting_time: 0,
        germinated_by: 0,
        harvest_from: 0,
        harvest_by: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.plant_id == 0
    }
}

/// Every field the appliance can report, one cell per field (§3 data model,
/// §9 design notes: a concrete struct rather than a dynamic field map).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportedState {
    pub connected: TimestampedValue<bool>,
    pub cooling: TimestampedValue<bool>,
    pub door: TimestampedValue<bool>,
    pub ec: TimestampedValue<i32>,
    pub firmware_ncu: TimestampedValue<i64>,
    pub humid_a: TimestampedValue<i32>,
    pub humid_b: TimestampedValue<i32>,
    pub light_a: TimestampedValue<bool>,
    pub light_b: TimestampedValue<bool>,
    pub mode: TimestampedValue<DeviceMode>,
    pub recipe_id: TimestampedValue<i64>,
    pub tank_level: TimestampedValue<i32>,
    pub tank_level_raw: TimestampedValue<i32>,
    pub temp_a: TimestampedValue<f64>,
    pub temp_b: TimestampedValue<f64>,
    pub temp_tank: TimestampedValue<f64>,
    pub total_offset: TimestampedValue<i32>,
    pub valve: TimestampedValue<ValveState>,
    pub wifi_level: TimestampedValue<i32>,
}

/// What a device does on its own queue: either a classified inbound MQTT
/// message, a plant-lifecycle operation invoked from the HTTP view, or one
/// of the three timers firing.
pub enum DeviceEvent {
    Inbound {
        prefix: Prefix,
        event: InboundEvent,
        payload: Vec<u8>,
    },
    AddPlant {
        layer: Layer,
        slot: usize,
        plant_id: i64,
        reply: Option<oneshot::Sender<Result<(), DeviceError>>>,
    },
    HarvestPlant {
        layer: Layer,
        slot: usize,
        reply: Option<oneshot::Sender<Result<(), DeviceError>>>,
    },
    SetMode {
        mode: DeviceMode,
    },
    SetSunrise {
        sunrise_sec: i32,
    },
    SubscribeSlots(oneshot::Sender<mpsc::Receiver<SlotEvent>>),
    SubscribeStatus(oneshot::Sender<mpsc::Receiver<StatusSnapshot>>),
    SaveTimerFired,
    RecipeTimerFired,
    WateringTimerFired,
}

/// On-disk shape of a device (§6). Recipe and `EcController` already derive
/// `Serialize`/`Deserialize` on their own, so this struct just names which
/// pieces of a `Device` make up the persisted snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceSnapshot {
    id: String,
    client_token: Option<String>,
    slots: [[Slot; NUM_SLOTS_PER_LAYER]; 2],
    recipe: Recipe,
    timezone: String,
    sunrise_sec: i32,
    aws_version: u64,
    reported: ReportedState,
    ec: EcController,
}

/// A snapshot-ready view of a device for the HTTP layer (§4.14). Reading it
/// never touches the device's queue.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub aws_version: u64,
    pub timezone: String,
    pub sunrise_sec: i32,
    pub recipe_id: i32,
    pub slots: [[Slot; NUM_SLOTS_PER_LAYER]; 2],
    pub status: StatusSnapshot,
}

#[derive(Default)]
struct HandleResult {
    replies: Vec<Reply>,
    save_now: bool,
}

/// Owns one appliance's full state. Runs as a single spawned task consuming
/// its own `DeviceEvent` queue; every method below is private precisely
/// because nothing outside that task may touch this state directly.
pub struct Device {
    id: String,
    client_token: Option<String>,
    slots: [[Slot; NUM_SLOTS_PER_LAYER]; 2],
    recipe: Recipe,
    timezone: String,
    sunrise_sec: i32,
    aws_version: u64,
    reported: ReportedState,
    ec: EcController,
    pending_watering_layer: Option<Layer>,
    timers: DeviceTimers,
    observers: ObserverHub,
    self_tx: mpsc::Sender<DeviceEvent>,
}

impl Device {
    fn default_recipe(as_of: Timestamp) -> Recipe {
        Recipe::create(
            as_of,
            &DEFAULT_LED_VALS,
            DEFAULT_TEMP_DAY_C,
            DEFAULT_TEMP_NIGHT_C,
            DEFAULT_WATER_TARGET,
            DEFAULT_WATER_DELAY_SEC,
            DEFAULT_DAY_LENGTH_SEC,
            LayerActiveness {
                layer_a: false,
                layer_b: false,
            },
        )
        .expect("fixed-length LED array")
    }

    /// Seeds a brand new device: both layers empty, a default (inactive)
    /// recipe, mode left unset (defaults to `DeviceMode::Default` when read).
    pub fn new_default(
        id: String,
        timezone: String,
        sunrise_sec: i32,
        self_tx: mpsc::Sender<DeviceEvent>,
    ) -> Self {
        let now = now_unix();
        Device {
            id,
            client_token: None,
            slots: [[Slot::EMPTY; NUM_SLOTS_PER_LAYER]; 2],
            recipe: Self::default_recipe(now),
            timezone,
            sunrise_sec,
            aws_version: 0,
            reported: ReportedState::default(),
            ec: EcController::default(),
            pending_watering_layer: None,
            timers: DeviceTimers::default(),
            observers: ObserverHub::default(),
            self_tx,
        }
    }

    fn from_snapshot(snapshot: DeviceSnapshot, self_tx: mpsc::Sender<DeviceEvent>) -> Self {
        Device {
            id: snapshot.id,
            client_token: snapshot.client_token,
            slots: snapshot.slots,
            recipe: snapshot.recipe,
            timezone: snapshot.timezone,
            sunrise_sec: snapshot.sunrise_sec,
            aws_version: snapshot.aws_version,
            reported: snapshot.reported,
            ec: snapshot.ec,
            pending_watering_layer: None,
            timers: DeviceTimers::default(),
            observers: ObserverHub::default(),
            self_tx,
        }
    }

    /// Restores a device from its persisted snapshot if one exists,
    /// otherwise seeds defaults (§4.9 device registry get-or-create).
    pub fn restore_or_seed(
        id: String,
        dir: &std::path::Path,
        timezone: String,
        sunrise_sec: i32,
        self_tx: mpsc::Sender<DeviceEvent>,
    ) -> Result<Self> {
        match crate::persistence::load::<DeviceSnapshot>(dir, &id)? {
            Some(snapshot) => Ok(Self::from_snapshot(snapshot, self_tx)),
            None => Ok(Self::new_default(id, timezone, sunrise_sec, self_tx)),
        }
    }

    fn to_snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            client_token: self.client_token.clone(),
            slots: self.slots,
            recipe: self.recipe.clone(),
            timezone: self.timezone.clone(),
            sunrise_sec: self.sunrise_sec,
            aws_version: self.aws_version,
            reported: self.reported.clone(),
            ec: self.ec,
        }
    }

    fn layer_is_empty(&self, layer: Layer) -> bool {
        self.slots[layer_index(layer)].iter().all(Slot::is_empty)
    }

    fn arm_save(&mut self) {
        self.timers.arm_save(&self.self_tx);
    }

    /// Learns the client token on the first `$aws/.../shadow/get` observed
    /// (§3 invariant); used only there.
    fn check_or_learn_token(&mut self, token: &str) -> Result<(), DeviceError> {
        match &self.client_token {
            None => {
                self.client_token = Some(token.to_string());
                Ok(())
            }
            Some(existing) if existing == token => Ok(()),
            Some(existing) => Err(DeviceError::ClientTokenMismatch {
                expected: existing.clone(),
                got: token.to_string(),
            }),
        }
    }

    /// Strict match against the already-learned token; used on every other
    /// cloud-side message. A `shadow/update` arriving before any
    /// `shadow/get` has a token to check against, and must reject rather
    /// than seed one (§3: the token is learned only on shadow/get).
    fn check_token(&self, token: &str) -> Result<(), DeviceError> {
        match &self.client_token {
            None => Err(DeviceError::ClientTokenMismatch {
                expected: "<none learned yet>".to_string(),
                got: token.to_string(),
            }),
            Some(existing) if existing == token => Ok(()),
            Some(existing) => Err(DeviceError::ClientTokenMismatch {
                expected: existing.clone(),
                got: token.to_string(),
            }),
        }
    }

    fn tz_offset(&self, t: Timestamp) -> Result<i32, DeviceError> {
        crate::tz::offset_seconds(&self.timezone, t)
            .map_err(|_| DeviceError::UnknownTimezone(self.timezone.clone()))
    }

    // -- dispatch table rows (§4.5) -----------------------------------

    fn agl_shadow_get(&mut self, t: Timestamp) -> Result<Vec<Reply>, DeviceError> {
        let tz_offset = self.tz_offset(t)?;
        let total_offset = crate::tz::total_offset(self.sunrise_sec, tz_offset);
        let reply = replies::vendor_shadow_get_accepted(
            &self.reported,
            &self.timezone,
            self.sunrise_sec,
            total_offset,
            self.recipe.id(),
        )?;
        Ok(vec![reply])
    }

    fn agl_mode_change(&mut self, payload: &[u8], t: Timestamp) -> Result<Vec<Reply>, DeviceError> {
        let parsed = messages::parse_agl_mode(payload)?;
        Ok(self.apply_mode(parsed.mode, t))
    }

    fn apply_mode(&mut self, mode: DeviceMode, t: Timestamp) -> Vec<Reply> {
        self.reported.mode.update(mode, t);
        self.aws_version += 1;
        let accepted = replies::aws_update_accepted(&self.reported, self.aws_version, t, None);
        let delta =
            replies::aws_field_delta("mode", serde_json::json!(mode as i32), self.aws_version, t);
        self.arm_save();
        vec![accepted, delta]
    }

    fn agl_shadow_update(&mut self, payload: &[u8], t: Timestamp) -> Result<Vec<Reply>, DeviceError> {
        let parsed = messages::parse_agl_shadow_update(payload)?;
        if let Some(v) = parsed.connected {
            self.reported.connected.update(v, t);
        }
        if let Some(v) = parsed.tank_level {
            self.reported.tank_level.update(v, t);
        }
        if let Some(ec_raw) = parsed.ec {
            self.reported.ec.update(ec_raw, t);
            let tank_temp = self.reported.temp_tank.value().copied().unwrap_or(25.0);
            self.ec.update(ec_raw as f64, tank_temp, t);
        }
        self.aws_version += 1;
        let reply = replies::aws_update_accepted(&self.reported, self.aws_version, t, None);
        self.arm_save();
        Ok(vec![reply])
    }

    fn aws_shadow_get(&mut self, payload: &[u8]) -> Result<Vec<Reply>, DeviceError> {
        let parsed = messages::parse_aws_shadow_get(payload)?;
        self.check_or_learn_token(&parsed.client_token)?;
        Ok(vec![])
    }

    fn aws_shadow_update(&mut self, payload: &[u8], t: Timestamp) -> Result<Vec<Reply>, DeviceError> {
        let parsed = messages::parse_aws_shadow_update(payload)?;
        self.check_token(&parsed.client_token)?;
        let r = parsed.reported;

        macro_rules! apply {
            ($field:ident) => {
                if let Some(v) = r.$field {
                    self.reported.$field.update(v, t);
                }
            };
        }
        apply!(cooling);
        apply!(door);
        apply!(firmware_ncu);
        apply!(humid_a);
        apply!(humid_b);
        apply!(light_a);
        apply!(light_b);
        apply!(recipe_id);
        apply!(tank_level);
        apply!(tank_level_raw);
        apply!(temp_a);
        apply!(temp_b);
        apply!(temp_tank);
        apply!(total_offset);
        apply!(valve);
        apply!(wifi_level);

        self.aws_version += 1;
        let mut out = vec![replies::aws_update_accepted(
            &self.reported,
            self.aws_version,
            t,
            Some(&parsed.client_token),
        )];

        if let Some(reported_recipe_id) = self.reported.recipe_id.value() {
            if *reported_recipe_id as i32 != self.recipe.id() {
                out.push(replies::aws_recipe_delta(self.recipe.id(), self.aws_version, t));
            }
        }

        if let Some(valve) = r.valve {
            if valve != ValveState::Closed {
                self.timers.cancel_watering();
                self.pending_watering_layer = None;
            }
        }

        self.arm_save();
        Ok(out)
    }

    fn handle_inbound(
        &mut self,
        prefix: Prefix,
        event: InboundEvent,
        payload: &[u8],
        t: Timestamp,
    ) -> Result<Vec<Reply>, DeviceError> {
        match (prefix, event) {
            (Prefix::AglAll, InboundEvent::ShadowGet) => self.agl_shadow_get(t),
            (Prefix::AglProd, InboundEvent::EventsInfo) => {
                let info = messages::parse_agl_event_info(payload)?;
                info!(device = %self.id, label = %info.label, ts = info.timestamp, "device info event");
                Ok(vec![])
            }
            (Prefix::AglProd, InboundEvent::EventsWarning) => {
                let warning = messages::parse_agl_event_warning(payload)?;
                warn!(
                    device = %self.id,
                    function = %warning.function_name,
                    log = %warning.error_log,
                    "device warning event"
                );
                Ok(vec![])
            }
            (Prefix::AglProd, InboundEvent::Mode) => self.agl_mode_change(payload, t),
            (Prefix::AglProd, InboundEvent::RecipeGet) => {
                messages::parse_agl_recipe_get(payload)?;
                Ok(vec![replies::recipe_bytes(&self.recipe)])
            }
            (Prefix::AglProd, InboundEvent::ShadowUpdate) => self.agl_shadow_update(payload, t),
            (Prefix::Aws, InboundEvent::ShadowGet) => self.aws_shadow_get(payload),
            (Prefix::Aws, InboundEvent::ShadowUpdate) => self.aws_shadow_update(payload, t),
            _ => Err(DeviceError::UnhandledTopic),
        }
    }

    // -- plant lifecycle operations (§4.5) -----------------------------

    fn add_plant(
        &mut self,
        layer: Layer,
        slot: usize,
        plant_id: i64,
        t: Timestamp,
        catalog: &PlantCatalog,
    ) -> Result<(), DeviceError> {
        if slot >= NUM_SLOTS_PER_LAYER {
            return Err(DeviceError::SlotOutOfRange(slot));
        }
        let idx = layer_index(layer);
        if !self.slots[idx][slot].is_empty() {
            return Err(DeviceError::SlotOccupied(slot));
        }
        let plant = catalog.get(plant_id)?;
        self.slots[idx][slot] = Slot {
            plant_id,
            planting_time: t,
            germinated_by: t + plant.germination.as_secs(),
            harvest_from: t + plant.harvest_from.as_secs(),
            harvest_by: t + plant.harvest_by.as_secs(),
        };

        self.observers.publish_slot(SlotEvent { layer, slot, plant_id });
        self.pending_watering_layer = Some(layer);
        self.timers.arm_recipe(&self.self_tx);
        self.timers.arm_watering(&self.self_tx, WATERING_DELAY_AFTER_PLANTING);
        self.arm_save();
        Ok(())
    }

    fn harvest_plant(&mut self, layer: Layer, slot: usize) -> Result<(), DeviceError> {
        if slot >= NUM_SLOTS_PER_LAYER {
            return Err(DeviceError::SlotOutOfRange(slot));
        }
        let idx = layer_index(layer);
        if self.slots[idx][slot].is_empty() {
            return Err(DeviceError::SlotEmpty(slot));
        }
        self.slots[idx][slot] = Slot::EMPTY;
        self.observers.publish_slot(SlotEvent {
            layer,
            slot,
            plant_id: 0,
        });
        self.pending_watering_layer = Some(layer);
        self.timers.arm_recipe(&self.self_tx);
        self.timers.arm_watering(&self.self_tx, WATERING_DELAY_AFTER_HARVEST);
        self.arm_save();
        Ok(())
    }

    fn set_sunrise(&mut self, sunrise_sec: i32, t: Timestamp) -> Result<Vec<Reply>, DeviceError> {
        self.sunrise_sec = sunrise_sec;
        let tz_offset = self.tz_offset(t)?;
        let total = crate::tz::total_offset(sunrise_sec, tz_offset);
        self.reported.total_offset.update(total, t);
        self.aws_version += 1;
        let delta =
            replies::aws_field_delta("total_offset", serde_json::json!(total), self.aws_version, t);
        self.arm_save();
        Ok(vec![delta])
    }

    fn regenerate_recipe(&mut self, t: Timestamp) -> Vec<Reply> {
        let activeness = LayerActiveness {
            layer_a: !self.layer_is_empty(Layer::A),
            layer_b: !self.layer_is_empty(Layer::B),
        };
        let candidate = match Recipe::create(
            t,
            &DEFAULT_LED_VALS,
            DEFAULT_TEMP_DAY_C,
            DEFAULT_TEMP_NIGHT_C,
            DEFAULT_WATER_TARGET,
            DEFAULT_WATER_DELAY_SEC,
            DEFAULT_DAY_LENGTH_SEC,
            activeness,
        ) {
            Ok(r) => r,
            Err(e) => {
                error!(device = %self.id, error = %e, "recipe regeneration failed");
                return vec![];
            }
        };

        let unchanged = candidate.equal_except_timestamps(&self.recipe)
            && self.recipe.age_difference(&candidate) < MIN_REGEN_AGE_SEC;
        if unchanged {
            return vec![];
        }

        self.recipe = candidate;
        self.reported.recipe_id.update(self.recipe.id() as i64, t);
        self.aws_version += 1;
        let delta = replies::aws_field_delta(
            "recipe_id",
            serde_json::json!(self.recipe.id()),
            self.aws_version,
            t,
        );
        self.arm_save();
        vec![delta]
    }

    fn watering_rpc(&mut self) -> Reply {
        let layer = self.pending_watering_layer.take().unwrap_or(Layer::A);
        replies::vendor_rpc_water(layer)
    }

    fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            temp_a: self.reported.temp_a.value().copied(),
            temp_b: self.reported.temp_b.value().copied(),
            humid_a: self.reported.humid_a.value().copied(),
            humid_b: self.reported.humid_b.value().copied(),
            light_a: self.reported.light_a.value().copied(),
            light_b: self.reported.light_b.value().copied(),
            tank_level: self.reported.tank_level.value().copied(),
            valve: self.reported.valve.value().map(|v| *v as i32),
            mode: self.reported.mode.value().map(|v| *v as i32),
            door: self.reported.door.value().copied(),
            ec: self.reported.ec.value().copied(),
            smoothed_ec: self.ec.smoothed(),
            want_nutrient: self.ec.want_nutrient(),
        }
    }

    pub fn view(&self) -> DeviceView {
        DeviceView {
            id: self.id.clone(),
            aws_version: self.aws_version,
            timezone: self.timezone.clone(),
            sunrise_sec: self.sunrise_sec,
            recipe_id: self.recipe.id(),
            slots: self.slots,
            status: self.status_snapshot(),
        }
    }

    /// Processes one event and returns what should be published and
    /// whether the resulting state should be saved. The one place every
    /// dispatch-table row and every plant-lifecycle op funnels through.
    fn handle(&mut self, event: DeviceEvent, t: Timestamp, catalog: &PlantCatalog) -> HandleResult {
        match event {
            DeviceEvent::Inbound { prefix, event, payload } => {
                match self.handle_inbound(prefix, event, &payload, t) {
                    Ok(replies) => HandleResult {
                        replies,
                        save_now: false,
                    },
                    Err(e) => {
                        warn!(device = %self.id, error = %e, "rejected inbound message");
                        HandleResult::default()
                    }
                }
            }
            DeviceEvent::AddPlant {
                layer,
                slot,
                plant_id,
                reply,
            } => {
                let result = self.add_plant(layer, slot, plant_id, t, catalog);
                if let Some(tx) = reply {
                    let _ = tx.send(result);
                }
                HandleResult::default()
            }
            DeviceEvent::HarvestPlant { layer, slot, reply } => {
                let result = self.harvest_plant(layer, slot);
                if let Some(tx) = reply {
                    let _ = tx.send(result);
                }
                HandleResult::default()
            }
            DeviceEvent::SetMode { mode } => HandleResult {
                replies: self.apply_mode(mode, t),
                save_now: false,
            },
            DeviceEvent::SetSunrise { sunrise_sec } => match self.set_sunrise(sunrise_sec, t) {
                Ok(replies) => HandleResult {
                    replies,
                    save_now: false,
                },
                Err(e) => {
                    error!(device = %self.id, error = %e, "set_sunrise failed");
                    HandleResult::default()
                }
            },
            DeviceEvent::SubscribeSlots(reply) => {
                let rx = self.observers.subscribe_slots(&self.slots);
                let _ = reply.send(rx);
                HandleResult::default()
            }
            DeviceEvent::SubscribeStatus(reply) => {
                let rx = self.observers.subscribe_status();
                let _ = reply.send(rx);
                HandleResult::default()
            }
            DeviceEvent::RecipeTimerFired => HandleResult {
                replies: self.regenerate_recipe(t),
                save_now: false,
            },
            DeviceEvent::WateringTimerFired => HandleResult {
                replies: vec![self.watering_rpc()],
                save_now: false,
            },
            DeviceEvent::SaveTimerFired => HandleResult {
                replies: vec![],
                save_now: true,
            },
        }
    }

    /// Runs the device's worker loop until its queue closes or a save
    /// fails. A save failure is fatal (§7): the caller is expected to stop
    /// the process rather than continue with an un-persisted device.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<DeviceEvent>,
        mqtt: AsyncClient,
        persist_dir: std::path::PathBuf,
        backup_count: usize,
        catalog: Arc<PlantCatalog>,
        view_tx: watch::Sender<DeviceView>,
    ) -> Result<()> {
        while let Some(event) = rx.recv().await {
            let t = now_unix();
            let outcome = self.handle(event, t, &catalog);

            for reply in outcome.replies {
                let topic = reply.topic(&self.id);
                if let Err(e) = mqtt.publish(topic.clone(), QoS::AtLeastOnce, false, reply.to_bytes()).await {
                    error!(device = %self.id, topic = %topic, error = %e, "publish failed");
                }
            }

            self.observers.publish_status(self.status_snapshot());
            let _ = view_tx.send(self.view());

            if outcome.save_now {
                let snapshot = self.to_snapshot();
                if let Err(e) = crate::persistence::save(&persist_dir, &self.id, backup_count, &snapshot) {
                    error!(device = %self.id, error = %e, "snapshot save failed, stopping device");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
