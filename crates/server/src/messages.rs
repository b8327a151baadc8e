//! Strict JSON parsing and range validation for every inbound MQTT topic.
//!
//! "Strict" here means: unknown fields reject (`#[serde(deny_unknown_fields)]`),
//! trailing data after the object rejects, and the payload must decode to
//! exactly one JSON object. `serde_json::from_slice` already enforces all
//! three for us once a struct target carries `deny_unknown_fields` — trailing
//! bytes after the value and non-object top-level shapes are both rejected by
//! its deserializer, so no hand-rolled "picky unmarshal" wrapper is needed.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{DeviceMode, ModeTrigger, ValveState};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
    #[error("protocol violation: {0}")]
    Protocol(String),
}

fn check_range_i64(field: &'static str, v: i64, lo: i64, hi_inclusive: i64) -> Result<(), MessageError> {
    if v < lo || v > hi_inclusive {
        return Err(MessageError::OutOfRange {
            field,
            value: v.to_string(),
        });
    }
    Ok(())
}

fn check_range_f64(field: &'static str, v: f64, lo: f64, hi_inclusive: f64) -> Result<(), MessageError> {
    if v < lo || v > hi_inclusive {
        return Err(MessageError::OutOfRange {
            field,
            value: v.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// $aws/.../shadow/get
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AwsShadowGetRaw {
    #[serde(rename = "clientToken")]
    client_token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwsShadowGet {
    pub client_token: String,
}

pub fn parse_aws_shadow_get(payload: &[u8]) -> Result<AwsShadowGet, MessageError> {
    let raw: AwsShadowGetRaw = serde_json::from_slice(payload)?;
    if raw.client_token.len() < 8 {
        return Err(MessageError::OutOfRange {
            field: "clientToken",
            value: raw.client_token,
        });
    }
    Ok(AwsShadowGet {
        client_token: raw.client_token,
    })
}

// ---------------------------------------------------------------------------
// $aws/.../shadow/update
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AwsReportedRaw {
    pub connected: Option<bool>,
    pub cooling: Option<bool>,
    pub door: Option<bool>,
    pub ec: Option<i32>,
    pub firmware_ncu: Option<i64>,
    pub humid_a: Option<i32>,
    pub humid_b: Option<i32>,
    pub light_a: Option<bool>,
    pub light_b: Option<bool>,
    pub mode: Option<i32>,
    pub recipe_id: Option<i64>,
    pub tank_level: Option<i32>,
    pub tank_level_raw: Option<i32>,
    pub temp_a: Option<f64>,
    pub temp_b: Option<f64>,
    pub temp_tank: Option<f64>,
    pub total_offset: Option<i32>,
    pub valve: Option<i32>,
    pub wifi_level: Option<i32>,
}

impl AwsReportedRaw {
    fn is_empty(&self) -> bool {
        self.connected.is_none()
            && self.cooling.is_none()
            && self.door.is_none()
            && self.ec.is_none()
            && self.firmware_ncu.is_none()
            && self.humid_a.is_none()
            && self.humid_b.is_none()
            && self.light_a.is_none()
            && self.light_b.is_none()
            && self.mode.is_none()
            && self.recipe_id.is_none()
            && self.tank_level.is_none()
            && self.tank_level_raw.is_none()
            && self.temp_a.is_none()
            && self.temp_b.is_none()
            && self.temp_tank.is_none()
            && self.total_offset.is_none()
            && self.valve.is_none()
            && self.wifi_level.is_none()
    }

    fn validate(&self) -> Result<(), MessageError> {
        if let Some(v) = self.firmware_ncu {
            check_range_i64("firmware_ncu", v, 1_667_466_618, i64::MAX)?;
        }
        if let Some(v) = self.humid_a {
            check_range_i64("humid_a", v as i64, 30, 100)?;
        }
        if let Some(v) = self.humid_b {
            check_range_i64("humid_b", v as i64, 30, 100)?;
        }
        if let Some(v) = self.recipe_id {
            if v != 1 && v < 1_680_300_000 {
                return Err(MessageError::OutOfRange {
                    field: "recipe_id",
                    value: v.to_string(),
                });
            }
        }
        if let Some(v) = self.tank_level {
            check_range_i64("tank_level", v as i64, 0, 2)?;
        }
        if let Some(v) = self.tank_level_raw {
            check_range_i64("tank_level_raw", v as i64, 0, 2)?;
        }
        if let Some(v) = self.temp_a {
            check_range_f64("temp_a", v, 10.0, 40.0)?;
        }
        if let Some(v) = self.temp_b {
            check_range_f64("temp_b", v, 10.0, 40.0)?;
        }
        if let Some(v) = self.temp_tank {
            check_range_f64("temp_tank", v, 10.0, 40.0)?;
        }
        if let Some(v) = self.total_offset {
            check_range_i64("total_offset", v as i64, 0, 86400)?;
        }
        if let Some(v) = self.valve {
            if ValveState::from_i32(v).is_none() {
                return Err(MessageError::OutOfRange {
                    field: "valve",
                    value: v.to_string(),
                });
            }
        }
        if let Some(v) = self.wifi_level {
            check_range_i64("wifi_level", v as i64, 0, 2)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AwsShadowUpdateStateRaw {
    reported: AwsReportedRaw,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AwsShadowUpdateRaw {
    #[serde(rename = "clientToken")]
    client_token: String,
    state: AwsShadowUpdateStateRaw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwsShadowUpdate {
    pub client_token: String,
    pub reported: AwsReportedFields,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AwsReportedFields {
    pub connected: Option<bool>,
    pub cooling: Option<bool>,
    pub door: Option<bool>,
    pub ec: Option<i32>,
    pub firmware_ncu: Option<i64>,
    pub humid_a: Option<i32>,
    pub humid_b: Option<i32>,
    pub light_a: Option<bool>,
    pub light_b: Option<bool>,
    pub mode: Option<DeviceMode>,
    pub recipe_id: Option<i64>,
    pub tank_level: Option<i32>,
    pub tank_level_raw: Option<i32>,
    pub temp_a: Option<f64>,
    pub temp_b: Option<f64>,
    pub temp_tank: Option<f64>,
    pub total_offset: Option<i32>,
    pub valve: Option<ValveState>,
    pub wifi_level: Option<i32>,
}

pub fn parse_aws_shadow_update(payload: &[u8]) -> Result<AwsShadowUpdate, MessageError> {
    let raw: AwsShadowUpdateRaw = serde_json::from_slice(payload)?;
    if raw.client_token.len() < 8 {
        return Err(MessageError::OutOfRange {
            field: "clientToken",
            value: raw.client_token,
        });
    }
    let reported = raw.state.reported;
    // Connected, EC and Mode are vendor-shadow-only (§3 invariants); the
    // cloud side never carries them.
    if reported.connected.is_some() {
        return Err(MessageError::Protocol(
            "connected is not valid on the cloud shadow".into(),
        ));
    }
    if reported.ec.is_some() {
        return Err(MessageError::Protocol(
            "ec is not valid on the cloud shadow".into(),
        ));
    }
    if reported.mode.is_some() {
        return Err(MessageError::Protocol(
            "mode is not valid on the cloud shadow".into(),
        ));
    }
    if reported.is_empty() {
        return Err(MessageError::Protocol("no fields reported".into()));
    }
    reported.validate()?;

    // `mode` was rejected above when present, so the cloud-side reported
    // fields never carry one.
    let mode = None;
    let valve = match reported.valve {
        Some(v) => Some(ValveState::from_i32(v).expect("validated above")),
        None => None,
    };

    Ok(AwsShadowUpdate {
        client_token: raw.client_token,
        reported: AwsReportedFields {
            connected: reported.connected,
            cooling: reported.cooling,
            door: reported.door,
            ec: reported.ec,
            firmware_ncu: reported.firmware_ncu,
            humid_a: reported.humid_a,
            humid_b: reported.humid_b,
            light_a: reported.light_a,
            light_b: reported.light_b,
            mode,
            recipe_id: reported.recipe_id,
            tank_level: reported.tank_level,
            tank_level_raw: reported.tank_level_raw,
            temp_a: reported.temp_a,
            temp_b: reported.temp_b,
            temp_tank: reported.temp_tank,
            total_offset: reported.total_offset,
            valve,
            wifi_level: reported.wifi_level,
        },
    })
}

// ---------------------------------------------------------------------------
// agl/prod/.../shadow/update  (vendor side: connected, ec, tank_level only)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AglReportedRaw {
    connected: Option<bool>,
    ec: Option<i32>,
    tank_level: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AglShadowUpdateStateRaw {
    reported: AglReportedRaw,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AglShadowUpdateRaw {
    state: AglShadowUpdateStateRaw,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AglShadowUpdate {
    pub connected: Option<bool>,
    pub ec: Option<i32>,
    pub tank_level: Option<i32>,
}

pub fn parse_agl_shadow_update(payload: &[u8]) -> Result<AglShadowUpdate, MessageError> {
    let raw: AglShadowUpdateRaw = serde_json::from_slice(payload)?;
    let r = raw.state.reported;
    if r.connected.is_none() && r.ec.is_none() && r.tank_level.is_none() {
        return Err(MessageError::Protocol("no fields reported".into()));
    }
    if let Some(v) = r.tank_level {
        check_range_i64("tank_level", v as i64, 0, 2)?;
    }
    Ok(AglShadowUpdate {
        connected: r.connected,
        ec: r.ec,
        tank_level: r.tank_level,
    })
}

// ---------------------------------------------------------------------------
// agl/prod/.../mode
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AglModeRaw {
    prev_mode: i32,
    mode: i32,
    trigger: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AglMode {
    pub prev_mode: DeviceMode,
    pub mode: DeviceMode,
    pub trigger: ModeTrigger,
}

pub fn parse_agl_mode(payload: &[u8]) -> Result<AglMode, MessageError> {
    let raw: AglModeRaw = serde_json::from_slice(payload)?;
    let prev_mode = DeviceMode::from_i32(raw.prev_mode).ok_or(MessageError::OutOfRange {
        field: "prev_mode",
        value: raw.prev_mode.to_string(),
    })?;
    let mode = DeviceMode::from_i32(raw.mode).ok_or(MessageError::OutOfRange {
        field: "mode",
        value: raw.mode.to_string(),
    })?;
    let trigger = ModeTrigger::from_i32(raw.trigger).ok_or(MessageError::OutOfRange {
        field: "trigger",
        value: raw.trigger.to_string(),
    })?;
    if mode == prev_mode {
        return Err(MessageError::Protocol(
            "mode must differ from prev_mode".into(),
        ));
    }
    Ok(AglMode {
        prev_mode,
        mode,
        trigger,
    })
}

// ---------------------------------------------------------------------------
// agl/prod/.../recipe/get
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AglRecipeGetRaw {
    version: i32,
    format: String,
}

pub fn parse_agl_recipe_get(payload: &[u8]) -> Result<(), MessageError> {
    let raw: AglRecipeGetRaw = serde_json::from_slice(payload)?;
    if raw.version != 7 {
        return Err(MessageError::OutOfRange {
            field: "version",
            value: raw.version.to_string(),
        });
    }
    if raw.format != "binary" {
        return Err(MessageError::Protocol(format!(
            "unsupported recipe format {:?}",
            raw.format
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// agl/prod/.../events/software/info/put
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AglEventInfoPayloadRaw {
    mode: Option<String>,
    state: Option<String>,
    layer: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AglEventInfoRaw {
    label: String,
    timestamp: i64,
    payload: AglEventInfoPayloadRaw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AglEventInfo {
    pub label: String,
    pub timestamp: i64,
}

pub fn parse_agl_event_info(payload: &[u8]) -> Result<AglEventInfo, MessageError> {
    let raw: AglEventInfoRaw = serde_json::from_slice(payload)?;
    Ok(AglEventInfo {
        label: raw.label,
        timestamp: raw.timestamp,
    })
}

// ---------------------------------------------------------------------------
// agl/prod/.../events/software/warning/put
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AglEventWarningPayloadRaw {
    error_log: String,
    function_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AglEventWarningRaw {
    label: String,
    timestamp: i64,
    payload: AglEventWarningPayloadRaw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AglEventWarning {
    pub label: String,
    pub timestamp: i64,
    pub error_log: String,
    pub function_name: String,
}

/// Warning payloads are observed to embed raw newlines inside JSON string
/// values, which would otherwise break the decode; substitute them with `_`
/// first, matching the appliance's own quirky escaping.
pub fn parse_agl_event_warning(payload: &[u8]) -> Result<AglEventWarning, MessageError> {
    let sanitized: Vec<u8> = payload
        .iter()
        .map(|&b| if b == b'\n' { b'_' } else { b })
        .collect();
    let raw: AglEventWarningRaw = serde_json::from_slice(&sanitized)?;
    Ok(AglEventWarning {
        label: raw.label,
        timestamp: raw.timestamp,
        error_log: raw.payload.error_log,
        function_name: raw.payload.function_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picky_parsing_rejects_type_mismatch() {
        assert!(parse_aws_shadow_get(br#"{"clientToken": 23}"#).is_err());
    }

    #[test]
    fn picky_parsing_rejects_unknown_field() {
        let payload = br#"{"clientToken":"12345678","extra":true}"#;
        assert!(parse_aws_shadow_get(payload).is_err());
    }

    #[test]
    fn picky_parsing_rejects_trailing_object() {
        let payload = br#"{"clientToken":"12345678"}{"clientToken":"87654321"}"#;
        assert!(parse_aws_shadow_get(payload).is_err());
    }

    #[test]
    fn picky_parsing_rejects_array_at_top_level() {
        let payload = br#"[{"clientToken":"12345678"}]"#;
        assert!(parse_aws_shadow_get(payload).is_err());
    }

    #[test]
    fn aws_shadow_get_rejects_short_token() {
        assert!(parse_aws_shadow_get(br#"{"clientToken":"dead"}"#).is_err());
    }

    #[test]
    fn aws_shadow_get_rejects_missing_token() {
        assert!(parse_aws_shadow_get(br#"{}"#).is_err());
    }

    #[test]
    fn aws_shadow_get_accepts_valid_token() {
        let got = parse_aws_shadow_get(br#"{"clientToken":"5975bc44"}"#).unwrap();
        assert_eq!(got.client_token, "5975bc44");
    }

    #[test]
    fn aws_shadow_update_rejects_connected() {
        let payload = br#"{"clientToken":"12345678","state":{"reported":{"connected":true}}}"#;
        assert!(parse_aws_shadow_update(payload).is_err());
    }

    #[test]
    fn aws_shadow_update_rejects_ec() {
        let payload = br#"{"clientToken":"12345678","state":{"reported":{"ec":1306}}}"#;
        assert!(parse_aws_shadow_update(payload).is_err());
    }

    #[test]
    fn aws_shadow_update_rejects_mode() {
        let payload = br#"{"clientToken":"12345678","state":{"reported":{"mode":0}}}"#;
        assert!(parse_aws_shadow_update(payload).is_err());
    }

    #[test]
    fn aws_shadow_update_accepts_temp_a_and_cooling() {
        let payload =
            br#"{"clientToken":"12345678","state":{"reported":{"cooling":false,"temp_a":19.86}}}"#;
        let got = parse_aws_shadow_update(payload).unwrap();
        assert_eq!(got.reported.cooling, Some(false));
        assert_eq!(got.reported.temp_a, Some(19.86));
    }

    #[test]
    fn aws_shadow_update_rejects_temp_out_of_range() {
        let payload =
            br#"{"clientToken":"12345678","state":{"reported":{"temp_a":99.0}}}"#;
        assert!(parse_aws_shadow_update(payload).is_err());
    }

    #[test]
    fn aws_shadow_update_accepts_recipe_id_sentinel() {
        let payload =
            br#"{"clientToken":"12345678","state":{"reported":{"recipe_id":1}}}"#;
        let got = parse_aws_shadow_update(payload).unwrap();
        assert_eq!(got.reported.recipe_id, Some(1));
    }

    #[test]
    fn aws_shadow_update_rejects_recipe_id_below_threshold_and_not_sentinel() {
        let payload =
            br#"{"clientToken":"12345678","state":{"reported":{"recipe_id":2}}}"#;
        assert!(parse_aws_shadow_update(payload).is_err());
    }

    #[test]
    fn aws_shadow_update_rejects_empty_reported() {
        let payload = br#"{"clientToken":"12345678","state":{"reported":{}}}"#;
        assert!(parse_aws_shadow_update(payload).is_err());
    }

    #[test]
    fn agl_shadow_update_accepts_connected() {
        let got = parse_agl_shadow_update(br#"{"state":{"reported":{"connected": true}}}"#).unwrap();
        assert_eq!(got.connected, Some(true));
        assert_eq!(got.ec, None);
    }

    #[test]
    fn agl_shadow_update_accepts_ec() {
        let got = parse_agl_shadow_update(br#"{"state":{"reported":{"ec": 1306}}}"#).unwrap();
        assert_eq!(got.ec, Some(1306));
    }

    #[test]
    fn agl_shadow_update_rejects_empty() {
        assert!(parse_agl_shadow_update(br#"{"state":{"reported":{}}}"#).is_err());
    }

    #[test]
    fn agl_mode_normal_change() {
        let got = parse_agl_mode(br#"{"prev_mode": 0,"mode": 8, "trigger": 1}"#).unwrap();
        assert_eq!(got.prev_mode, DeviceMode::Default);
        assert_eq!(got.mode, DeviceMode::Cinema);
        assert_eq!(got.trigger, ModeTrigger::Device);
    }

    #[test]
    fn agl_mode_rejects_no_change() {
        assert!(parse_agl_mode(br#"{"prev_mode": 0,"mode": 0, "trigger": 1}"#).is_err());
    }

    #[test]
    fn agl_mode_rejects_invalid_prev_mode() {
        assert!(parse_agl_mode(br#"{"prev_mode": -1,"mode": 0, "trigger": 1}"#).is_err());
        assert!(parse_agl_mode(br#"{"prev_mode": 9,"mode": 0, "trigger": 1}"#).is_err());
    }

    #[test]
    fn agl_mode_rejects_invalid_mode() {
        assert!(parse_agl_mode(br#"{"prev_mode": 0,"mode": -1, "trigger": 1}"#).is_err());
        assert!(parse_agl_mode(br#"{"prev_mode": 0,"mode": 9, "trigger": 1}"#).is_err());
    }

    #[test]
    fn agl_mode_rejects_missing_fields() {
        assert!(parse_agl_mode(br#"{"mode": -1, "trigger": 1}"#).is_err());
        assert!(parse_agl_mode(br#"{"prev_mode": 0, "trigger": 1}"#).is_err());
        assert!(parse_agl_mode(br#"{"prev_mode": 0, "mode":2}"#).is_err());
    }

    #[test]
    fn agl_recipe_get_accepts_version_and_binary_format() {
        assert!(parse_agl_recipe_get(br#"{"version":7,"format":"binary"}"#).is_ok());
    }

    #[test]
    fn agl_recipe_get_rejects_wrong_version() {
        assert!(parse_agl_recipe_get(br#"{"version":6,"format":"binary"}"#).is_err());
    }

    #[test]
    fn agl_recipe_get_rejects_wrong_format() {
        assert!(parse_agl_recipe_get(br#"{"version":7,"format":"json"}"#).is_err());
    }

    #[test]
    fn warning_payload_substitutes_raw_newlines() {
        let payload = b"{\"label\":\"door\",\"timestamp\":1,\"payload\":{\"error_log\":\"line1\nline2\",\"function_name\":\"f\"}}";
        let got = parse_agl_event_warning(payload).unwrap();
        assert_eq!(got.error_log, "line1_line2");
    }

    #[test]
    fn info_event_accepts_string_mode() {
        let payload = br#"{"label":"mode_change","timestamp":1,"payload":{"mode":"ECO_MODE","state":"0","layer":"APPLIANCE"}}"#;
        let got = parse_agl_event_info(payload).unwrap();
        assert_eq!(got.label, "mode_change");
        assert_eq!(got.timestamp, 1);
    }
}
