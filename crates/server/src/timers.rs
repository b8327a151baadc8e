//! Three per-device coalescing timers (§4.6). Arming a timer aborts any
//! pending one of the same kind and spawns a fresh sleep; this is simpler
//! than a real coalescing scheduler and sufficient because each device only
//! ever has one timer of each kind in flight.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::DeviceEvent;

pub const SAVE_DELAY: Duration = Duration::from_secs(20);
pub const RECIPE_DELAY: Duration = Duration::from_secs(2 * 60);
pub const WATERING_DELAY_AFTER_PLANTING: Duration = Duration::from_secs(11 * 60 - 4);
pub const WATERING_DELAY_AFTER_HARVEST: Duration = Duration::from_secs(41 * 60);

fn spawn_timer(tx: mpsc::Sender<DeviceEvent>, delay: Duration, event: DeviceEvent) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(event).await;
    })
}

#[derive(Default)]
pub struct DeviceTimers {
    save: Option<JoinHandle<()>>,
    recipe: Option<JoinHandle<()>>,
    watering: Option<JoinHandle<()>>,
}

impl DeviceTimers {
    pub fn arm_save(&mut self, tx: &mpsc::Sender<DeviceEvent>) {
        if let Some(h) = self.save.take() {
            h.abort();
        }
        self.save = Some(spawn_timer(tx.clone(), SAVE_DELAY, DeviceEvent::SaveTimerFired));
    }

    pub fn arm_recipe(&mut self, tx: &mpsc::Sender<DeviceEvent>) {
        if let Some(h) = self.recipe.take() {
            h.abort();
        }
        self.recipe = Some(spawn_timer(tx.clone(), RECIPE_DELAY, DeviceEvent::RecipeTimerFired));
    }

    pub fn arm_watering(&mut self, tx: &mpsc::Sender<DeviceEvent>, delay: Duration) {
        if let Some(h) = self.watering.take() {
            h.abort();
        }
        self.watering = Some(spawn_timer(tx.clone(), delay, DeviceEvent::WateringTimerFired));
    }

    pub fn cancel_watering(&mut self) {
        if let Some(h) = self.watering.take() {
            h.abort();
        }
    }
}

impl Drop for DeviceTimers {
    fn drop(&mut self) {
        if let Some(h) = self.save.take() {
            h.abort();
        }
        if let Some(h) = self.recipe.take() {
            h.abort();
        }
        if let Some(h) = self.watering.take() {
            h.abort();
        }
    }
}
