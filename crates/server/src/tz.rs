//! IANA timezone offset lookup feeding the total-offset computation (§4.5).
//! Neither the teacher's own `time` dependency nor the standard library
//! carries a timezone database, so this resolves offsets via `chrono-tz`.

use chrono::{Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use thiserror::Error;

use crate::value::Timestamp;

#[derive(Debug, Error)]
pub enum TzError {
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
}

/// UTC offset in seconds for `tz_name` at instant `at`, honouring DST.
pub fn offset_seconds(tz_name: &str, at: Timestamp) -> Result<i32, TzError> {
    let tz = Tz::from_str(tz_name).map_err(|_| TzError::UnknownTimezone(tz_name.to_string()))?;
    let utc = Utc
        .timestamp_opt(at, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));
    Ok(utc.with_timezone(&tz).offset().fix().local_minus_utc())
}

/// `(86400 - sunrise + tzOffset) mod 86400`, clamped into `[0, 86400)`. The
/// modulo is the appliance's observed clamp for timezones east of UTC+7.
pub fn total_offset(sunrise_sec: i32, tz_offset_sec: i32) -> i32 {
    (((86400 - sunrise_sec + tz_offset_sec) % 86400) + 86400) % 86400
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon_utc(y: i32, m: u32, d: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    // S4: Europe/Berlin, sunrise 07:00, 2023-06-30 -> 68400.
    #[test]
    fn s4_europe_berlin_summer() {
        let offset = offset_seconds("Europe/Berlin", noon_utc(2023, 6, 30)).unwrap();
        assert_eq!(offset, 7200); // CEST
        assert_eq!(total_offset(25200, offset), 68400);
    }

    // S5: Pacific/Kiritimati, sunrise 06:30, 2023-02-28 -> 27000.
    #[test]
    fn s5_pacific_kiritimati() {
        let offset = offset_seconds("Pacific/Kiritimati", noon_utc(2023, 2, 28)).unwrap();
        assert_eq!(offset, 14 * 3600);
        assert_eq!(total_offset(23400, offset), 27000);
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        assert!(offset_seconds("Not/ATimezone", 0).is_err());
    }

    #[test]
    fn total_offset_is_always_in_range() {
        for sunrise in [0, 3600, 25200, 43200, 86399] {
            for tz in [-12 * 3600, -3600, 0, 3600, 14 * 3600] {
                let v = total_offset(sunrise, tz);
                assert!((0..86400).contains(&v), "{sunrise} {tz} -> {v}");
            }
        }
    }
}
