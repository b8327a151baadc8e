//! A single reported field: a value paired with the instant it was last
//! reported. Equality of that instant against the message time currently
//! being processed is the whole mechanism that makes shadow-update-accepted
//! replies sparse (§4.1/§4.4): a field is "part of this reply" iff its
//! timestamp is *exactly* the reply's timestamp, not merely recent.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Unix-second timestamp. The appliance and every message on the wire use
/// whole seconds; sub-second resolution is never observed, so this is not a
/// `chrono::DateTime` here — it buys nothing and every comparison in §4 is
/// defined as exact-equality on this unit anyway.
pub type Timestamp = i64;

/// `(value, updatedAt)` cell. `updatedAt == 0` means "never reported".
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedValue<T> {
    value: Option<T>,
    time: Timestamp,
}

impl<T> Default for TimestampedValue<T> {
    fn default() -> Self {
        Self {
            value: None,
            time: 0,
        }
    }
}

impl<T: Clone> TimestampedValue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new value as of `t`.
    pub fn update(&mut self, v: T, t: Timestamp) {
        self.value = Some(v);
        self.time = t;
    }

    /// True iff this field was last reported at exactly `t`.
    pub fn was_updated_at(&self, t: Timestamp) -> bool {
        self.value.is_some() && self.time == t
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

// Persisted representation: `{}` when never set, `{"value": V, "time": T}`
// otherwise. This mirrors the original's `MarshalJSON` on the field cell,
// used only for the on-disk snapshot (C8) — reply payloads are assembled
// fresh field-by-field in `replies.rs`, not by reusing this impl.
impl<T: Serialize> Serialize for TimestampedValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.value {
            None => serializer.serialize_map(Some(0))?.end(),
            Some(v) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("value", v)?;
                map.serialize_entry("time", &self.time)?;
                map.end()
            }
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for TimestampedValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CellVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for CellVisitor<T> {
            type Value = TimestampedValue<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object `{}` or `{value, time}`")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut value = None;
                let mut time = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "value" => value = Some(map.next_value()?),
                        "time" => time = Some(map.next_value()?),
                        other => {
                            return Err(de::Error::unknown_field(other, &["value", "time"]))
                        }
                    }
                }
                match (value, time) {
                    (Some(v), Some(t)) => Ok(TimestampedValue {
                        value: Some(v),
                        time: t,
                    }),
                    (None, None) => Ok(TimestampedValue::default()),
                    _ => Err(de::Error::custom(
                        "timestamped value must set both `value` and `time`, or neither",
                    )),
                }
            }
        }

        deserializer.deserialize_map(CellVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_cell_was_never_updated() {
        let cell: TimestampedValue<bool> = TimestampedValue::new();
        assert!(!cell.was_updated_at(0));
        assert!(!cell.is_set());
    }

    #[test]
    fn update_sets_exact_timestamp_match() {
        let mut cell = TimestampedValue::new();
        cell.update(42i32, 1000);
        assert!(cell.was_updated_at(1000));
        assert!(!cell.was_updated_at(999));
        assert!(!cell.was_updated_at(1001));
        assert_eq!(cell.value(), Some(&42));
    }

    #[test]
    fn serializes_empty_object_when_unset() {
        let cell: TimestampedValue<f64> = TimestampedValue::new();
        let json = serde_json::to_value(&cell).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn serializes_value_and_time_when_set() {
        let mut cell = TimestampedValue::new();
        cell.update(19.86, 1691777930);
        let json = serde_json::to_value(&cell).unwrap();
        assert_eq!(json["value"], 19.86);
        assert_eq!(json["time"], 1691777930);
    }

    #[test]
    fn round_trips_through_json() {
        let mut cell = TimestampedValue::new();
        cell.update("hello".to_string(), 77);
        let json = serde_json::to_string(&cell).unwrap();
        let back: TimestampedValue<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cell);
    }

    #[test]
    fn deserialize_rejects_unknown_fields() {
        let err = serde_json::from_str::<TimestampedValue<i32>>(r#"{"value":1,"time":2,"x":3}"#);
        assert!(err.is_err());
    }
}
