//! Small closed-set enums shared across the reported-state model, the
//! parsers and the reply builders. Wire representation is always the
//! integer discriminant the appliance sends/expects, not the variant name.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Operating mode of the appliance. Sent and received as a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum DeviceMode {
    Default = 0,
    Debug = 1,
    RinseEnd = 2,
    TankDrainCleaning = 3,
    TankDrainExplicit = 4,
    Cleaning = 5,
    Unknown = 6,
    Silent = 7,
    Cinema = 8,
}

impl DeviceMode {
    /// Parses a raw integer, rejecting anything outside the enum's range.
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Default),
            1 => Some(Self::Debug),
            2 => Some(Self::RinseEnd),
            3 => Some(Self::TankDrainCleaning),
            4 => Some(Self::TankDrainExplicit),
            5 => Some(Self::Cleaning),
            6 => Some(Self::Unknown),
            7 => Some(Self::Silent),
            8 => Some(Self::Cinema),
            _ => None,
        }
    }
}

/// Physical valve position, as reported on the cloud shadow's `valve` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum ValveState {
    OpenLayerB = 0,
    OpenLayerA = 1,
    Closed = 4,
}

impl ValveState {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::OpenLayerB),
            1 => Some(Self::OpenLayerA),
            4 => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Who initiated a mode change: the controlling app, or the device itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum ModeTrigger {
    App = 0,
    Device = 1,
}

impl ModeTrigger {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::App),
            1 => Some(Self::Device),
            _ => None,
        }
    }
}

/// Which of the two growing layers a watering RPC or recipe block targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layer {
    A,
    B,
}

impl Layer {
    pub fn as_rpc_str(self) -> &'static str {
        match self {
            Layer::A => "layer_a",
            Layer::B => "layer_b",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_mode_round_trips_valid_range() {
        for raw in 0..=8 {
            assert_eq!(DeviceMode::from_i32(raw).map(|m| m as i32), Some(raw));
        }
    }

    #[test]
    fn device_mode_rejects_out_of_range() {
        assert!(DeviceMode::from_i32(-1).is_none());
        assert!(DeviceMode::from_i32(9).is_none());
    }

    #[test]
    fn valve_state_rejects_gaps() {
        assert!(ValveState::from_i32(2).is_none());
        assert!(ValveState::from_i32(3).is_none());
        assert_eq!(ValveState::from_i32(4), Some(ValveState::Closed));
    }

    #[test]
    fn mode_trigger_valid_values() {
        assert_eq!(ModeTrigger::from_i32(0), Some(ModeTrigger::App));
        assert_eq!(ModeTrigger::from_i32(1), Some(ModeTrigger::Device));
        assert!(ModeTrigger::from_i32(2).is_none());
    }
}
