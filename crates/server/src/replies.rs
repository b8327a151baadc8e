//! Builds the four reply shapes the engine can publish back to the broker
//! (§4.4). Each builder takes the device's reported-state cells and the
//! event time and emits exactly the JSON/binary the appliance expects.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::device::ReportedState;
use crate::recipe::Recipe;
use crate::types::Layer;
use crate::value::Timestamp;

const FIXED_STAGE: &str = "prod";
const FIXED_VERBOSE_REPORTING: bool = false;
const FIXED_FIRMWARE_NCU: i64 = 1_667_466_618;
const FIXED_FIRMWARE_MCU: i64 = 1_667_466_618;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("cannot build shadow-get reply: no recipe assigned yet")]
    NoRecipe,
    #[error("cannot build shadow-get reply: timezone is empty")]
    NoTimezone,
}

/// A message ready to publish: knows its own topic and wire encoding.
#[derive(Debug, Clone)]
pub enum Reply {
    VendorShadowGetAccepted(Value),
    AwsShadowUpdateAccepted(Value),
    AwsShadowUpdateDelta(Value),
    VendorRpcPut(Value),
    Recipe(Vec<u8>),
}

impl Reply {
    pub fn topic(&self, device_id: &str) -> String {
        match self {
            Reply::VendorShadowGetAccepted(_) => {
                format!("agl/all/things/{device_id}/shadow/get/accepted")
            }
            Reply::AwsShadowUpdateAccepted(_) => {
                format!("$aws/things/{device_id}/shadow/update/accepted")
            }
            Reply::AwsShadowUpdateDelta(_) => {
                format!("$aws/things/{device_id}/shadow/update/delta")
            }
            Reply::VendorRpcPut(_) => format!("agl/all/things/{device_id}/rpc/put"),
            Reply::Recipe(_) => format!("agl/prod/things/{device_id}/recipe"),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Reply::VendorShadowGetAccepted(v)
            | Reply::AwsShadowUpdateAccepted(v)
            | Reply::AwsShadowUpdateDelta(v)
            | Reply::VendorRpcPut(v) => serde_json::to_vec(v).expect("reply JSON never fails"),
            Reply::Recipe(bytes) => bytes.clone(),
        }
    }
}

/// Vendor shadow-get accepted: a snapshot, not a sparse delta.
pub fn vendor_shadow_get_accepted(
    reported: &ReportedState,
    timezone: &str,
    user_offset: i32,
    total_offset: i32,
    recipe_id: i32,
) -> Result<Reply, ReplyError> {
    if recipe_id <= 1 {
        return Err(ReplyError::NoRecipe);
    }
    if timezone.is_empty() {
        return Err(ReplyError::NoTimezone);
    }
    let mode_raw = reported.mode.value().copied().unwrap_or(crate::types::DeviceMode::Default) as i32;
    Ok(Reply::VendorShadowGetAccepted(json!({
        "timezone": timezone,
        "user_offset": user_offset,
        "total_offset": total_offset,
        "mode": mode_raw,
        "stage": FIXED_STAGE,
        "verbose_reporting": FIXED_VERBOSE_REPORTING,
        "recipe_id": recipe_id,
        "firmware_ncu": FIXED_FIRMWARE_NCU,
        "firmware_mcu": FIXED_FIRMWARE_MCU,
    })))
}

/// Pushes `value` into `state[key]` and `{"timestamp": t}` into `metadata[key]`
/// iff `cell` was updated at exactly `t`. The single mechanism behind every
/// sparse reply in this module.
macro_rules! push_if_updated {
    ($state:expr, $metadata:expr, $t:expr, $key:literal, $cell:expr) => {
        if $cell.was_updated_at($t) {
            $state.insert($key.to_string(), json!($cell.value().unwrap()));
            $metadata.insert($key.to_string(), json!({ "timestamp": $t }));
        }
    };
}

fn sparse_fields(reported: &ReportedState, t: Timestamp) -> (Map<String, Value>, Map<String, Value>) {
    let mut state = Map::new();
    let mut metadata = Map::new();

    push_if_updated!(state, metadata, t, "connected", reported.connected);
    push_if_updated!(state, metadata, t, "cooling", reported.cooling);
    push_if_updated!(state, metadata, t, "door", reported.door);
    push_if_updated!(state, metadata, t, "ec", reported.ec);
    push_if_updated!(state, metadata, t, "firmware_ncu", reported.firmware_ncu);
    push_if_updated!(state, metadata, t, "humid_a", reported.humid_a);
    push_if_updated!(state, metadata, t, "humid_b", reported.humid_b);
    push_if_updated!(state, metadata, t, "light_a", reported.light_a);
    push_if_updated!(state, metadata, t, "light_b", reported.light_b);
    if reported.mode.was_updated_at(t) {
        state.insert("mode".to_string(), json!(*reported.mode.value().unwrap() as i32));
        metadata.insert("mode".to_string(), json!({ "timestamp": t }));
    }
    push_if_updated!(state, metadata, t, "recipe_id", reported.recipe_id);
    push_if_updated!(state, metadata, t, "tank_level", reported.tank_level);
    push_if_updated!(state, metadata, t, "tank_level_raw", reported.tank_level_raw);
    push_if_updated!(state, metadata, t, "temp_a", reported.temp_a);
    push_if_updated!(state, metadata, t, "temp_b", reported.temp_b);
    push_if_updated!(state, metadata, t, "temp_tank", reported.temp_tank);
    push_if_updated!(state, metadata, t, "total_offset", reported.total_offset);
    if reported.valve.was_updated_at(t) {
        state.insert("valve".to_string(), json!(*reported.valve.value().unwrap() as i32));
        metadata.insert("valve".to_string(), json!({ "timestamp": t }));
    }
    push_if_updated!(state, metadata, t, "wifi_level", reported.wifi_level);

    (state, metadata)
}

/// Cloud shadow-update accepted (§4.4). `client_token` is omitted for
/// vendor-originated updates (dual-shadow echoing, §4.5).
pub fn aws_update_accepted(
    reported: &ReportedState,
    version: u64,
    t: Timestamp,
    client_token: Option<&str>,
) -> Reply {
    let (state, metadata) = sparse_fields(reported, t);
    let mut body = json!({
        "version": version,
        "timestamp": t,
        "state": { "reported": state },
        "metadata": { "reported": metadata },
    });
    if let Some(token) = client_token {
        body["clientToken"] = json!(token);
    }
    Reply::AwsShadowUpdateAccepted(body)
}

/// Cloud shadow-update delta advertising a desired `recipe_id` that differs
/// from what the device last reported. Flatter than `accepted`: no outer
/// `reported` key.
pub fn aws_recipe_delta(desired_recipe_id: i32, version: u64, t: Timestamp) -> Reply {
    Reply::AwsShadowUpdateDelta(json!({
        "version": version,
        "timestamp": t,
        "state": { "recipe_id": desired_recipe_id },
        "metadata": { "recipe_id": { "timestamp": t } },
    }))
}

/// Delta for an arbitrary single field (used for mode/sunrise deltas, §4.5).
pub fn aws_field_delta(field: &str, value: Value, version: u64, t: Timestamp) -> Reply {
    Reply::AwsShadowUpdateDelta(json!({
        "version": version,
        "timestamp": t,
        "state": { field: value },
        "metadata": { field: { "timestamp": t } },
    }))
}

pub fn vendor_rpc_water(layer: Layer) -> Reply {
    Reply::VendorRpcPut(json!({
        "cmd": "mcu_trigger_water_event",
        "layer": layer.as_rpc_str(),
    }))
}

pub fn recipe_bytes(recipe: &Recipe) -> Reply {
    Reply::Recipe(recipe.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ReportedState;
    use crate::recipe::LayerActiveness;

    // S1: simple reported update.
    #[test]
    fn s1_accepted_reply_contains_exactly_changed_fields() {
        let mut state = ReportedState::default();
        state.cooling.update(true, 1_000);
        state.door.update(true, 1_000);
        state.temp_a.update(22.31, 1_000);

        let t = 1_691_777_930;
        state.cooling.update(false, t);
        state.temp_a.update(19.86, t);

        let reply = aws_update_accepted(&state, 9877, t, Some("12345678"));
        let Reply::AwsShadowUpdateAccepted(body) = reply else {
            panic!("wrong variant")
        };

        assert_eq!(body["version"], 9877);
        assert_eq!(body["clientToken"], "12345678");
        assert_eq!(body["state"]["reported"]["cooling"], false);
        assert_eq!(body["state"]["reported"]["temp_a"], 19.86);
        assert!(body["state"]["reported"].get("door").is_none());
        assert_eq!(body["metadata"]["reported"]["cooling"]["timestamp"], t);
    }

    #[test]
    fn client_token_omitted_when_none() {
        let mut state = ReportedState::default();
        state.ec.update(1306, 5);
        let reply = aws_update_accepted(&state, 2, 5, None);
        let Reply::AwsShadowUpdateAccepted(body) = reply else {
            panic!("wrong variant")
        };
        assert!(body.get("clientToken").is_none());
    }

    #[test]
    fn vendor_shadow_get_rejects_sentinel_recipe_id() {
        let state = ReportedState::default();
        let err = vendor_shadow_get_accepted(&state, "Europe/Berlin", 25200, 68400, 1).unwrap_err();
        matches!(err, ReplyError::NoRecipe);
    }

    #[test]
    fn vendor_shadow_get_rejects_empty_timezone() {
        let state = ReportedState::default();
        let err = vendor_shadow_get_accepted(&state, "", 25200, 68400, 1_680_300_001).unwrap_err();
        matches!(err, ReplyError::NoTimezone);
    }

    #[test]
    fn vendor_rpc_water_shapes_command() {
        let reply = vendor_rpc_water(Layer::A);
        let Reply::VendorRpcPut(body) = reply else {
            panic!("wrong variant")
        };
        assert_eq!(body["cmd"], "mcu_trigger_water_event");
        assert_eq!(body["layer"], "layer_a");
    }

    #[test]
    fn recipe_reply_is_the_binary_encoding() {
        let recipe = Recipe::create(
            1000,
            &[0, 0, 0, 0],
            20.0,
            18.0,
            50,
            0,
            12 * 3600,
            LayerActiveness {
                layer_a: true,
                layer_b: true,
            },
        )
        .unwrap();
        let reply = recipe_bytes(&recipe);
        let Reply::Recipe(bytes) = reply else {
            panic!("wrong variant")
        };
        assert_eq!(bytes, recipe.to_bytes());
    }

    #[test]
    fn topics_match_spec_surface() {
        assert_eq!(
            aws_update_accepted(&ReportedState::default(), 1, 1, None).topic("abc"),
            "$aws/things/abc/shadow/update/accepted"
        );
        assert_eq!(
            aws_recipe_delta(1, 1, 1).topic("abc"),
            "$aws/things/abc/shadow/update/delta"
        );
        assert_eq!(
            vendor_rpc_water(Layer::B).topic("abc"),
            "agl/all/things/abc/rpc/put"
        );
    }
}
