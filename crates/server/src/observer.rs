//! Slot-change and status-snapshot fan-out for UI subscribers (§4.11 of the
//! component design). Subscriber lists are owned by the device's single
//! worker task, so no locking is needed here; a slow or dead subscriber
//! never blocks a mutation, it just stops receiving updates.

use tokio::sync::mpsc;

use crate::device::Slot;
use crate::types::Layer;

const CHANNEL_CAPACITY: usize = 32;

/// A plant was placed in or removed from `(layer, slot)`. `plant_id == 0`
/// means the slot became empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEvent {
    pub layer: Layer,
    pub slot: usize,
    pub plant_id: i64,
}

/// A point-in-time view of everything the UI cares about.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatusSnapshot {
    pub temp_a: Option<f64>,
    pub temp_b: Option<f64>,
    pub humid_a: Option<i32>,
    pub humid_b: Option<i32>,
    pub light_a: Option<bool>,
    pub light_b: Option<bool>,
    pub tank_level: Option<i32>,
    pub valve: Option<i32>,
    pub mode: Option<i32>,
    pub door: Option<bool>,
    pub ec: Option<i32>,
    pub smoothed_ec: Option<f64>,
    pub want_nutrient: i32,
}

/// Two independent buffered-channel streams per device. A late subscriber to
/// the slot stream is primed with one event per occupied slot so it doesn't
/// have to wait for the next mutation to learn current occupancy.
#[derive(Default)]
pub struct ObserverHub {
    slot_subs: Vec<mpsc::Sender<SlotEvent>>,
    status_subs: Vec<mpsc::Sender<StatusSnapshot>>,
}

impl ObserverHub {
    pub fn subscribe_slots(&mut self, slots: &[[Slot; 9]; 2]) -> mpsc::Receiver<SlotEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        for (layer_idx, layer_slots) in slots.iter().enumerate() {
            let layer = if layer_idx == 0 { Layer::A } else { Layer::B };
            for (slot_idx, slot) in layer_slots.iter().enumerate() {
                let _ = tx.try_send(SlotEvent {
                    layer,
                    slot: slot_idx,
                    plant_id: slot.plant_id,
                });
            }
        }
        self.slot_subs.push(tx);
        rx
    }

    pub fn subscribe_status(&mut self) -> mpsc::Receiver<StatusSnapshot> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.status_subs.push(tx);
        rx
    }

    pub fn publish_slot(&mut self, event: SlotEvent) {
        self.slot_subs
            .retain(|tx| tx.try_send(event).is_ok() || !tx.is_closed());
    }

    pub fn publish_status(&mut self, snapshot: StatusSnapshot) {
        self.status_subs
            .retain(|tx| tx.try_send(snapshot.clone()).is_ok() || !tx.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Slot;

    #[test]
    fn slot_subscribe_primes_with_current_occupancy() {
        let mut hub = ObserverHub::default();
        let mut slots = [[Slot::EMPTY; 9]; 2];
        slots[0][3] = Slot {
            plant_id: 42,
            planting_time: 1,
            germinated_by: 2,
            harvest_from: 3,
            harvest_by: 4,
        };
        let mut rx = hub.subscribe_slots(&slots);
        let mut seen_planted = false;
        while let Ok(ev) = rx.try_recv() {
            if ev.layer == Layer::A && ev.slot == 3 {
                assert_eq!(ev.plant_id, 42);
                seen_planted = true;
            }
        }
        assert!(seen_planted);
    }

    #[test]
    fn publish_reaches_all_live_subscribers() {
        let mut hub = ObserverHub::default();
        let slots = [[Slot::EMPTY; 9]; 2];
        let mut rx1 = hub.subscribe_slots(&slots);
        let mut rx2 = hub.subscribe_slots(&slots);
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}

        hub.publish_slot(SlotEvent {
            layer: Layer::B,
            slot: 0,
            plant_id: 7,
        });
        assert_eq!(
            rx1.try_recv().unwrap(),
            SlotEvent {
                layer: Layer::B,
                slot: 0,
                plant_id: 7
            }
        );
        assert_eq!(
            rx2.try_recv().unwrap(),
            SlotEvent {
                layer: Layer::B,
                slot: 0,
                plant_id: 7
            }
        );
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let mut hub = ObserverHub::default();
        {
            let _rx = hub.subscribe_status();
        }
        assert_eq!(hub.status_subs.len(), 1);
        hub.publish_status(StatusSnapshot::default());
        assert_eq!(hub.status_subs.len(), 0);
    }
}
