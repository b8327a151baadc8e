//! Plant catalog: read-only reference data consulted when a slot is planted
//! (§4.5 `AddPlant`, §4.12). Durations on disk are compound strings like
//! `"1w3d2h"`; this is the one place in the system that needs a bespoke
//! parser rather than a plain serde derive.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(\d+)w)?(?:(\d+)d)?(?:(\d+)h)?$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum PlantError {
    #[error("failed to read plant catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse plant catalog {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown plant id {0}")]
    UnknownPlant(i64),
}

/// A duration expressed only in whole weeks/days/hours, as the catalog file
/// stores it. Represented internally as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlantDuration(pub i64);

impl PlantDuration {
    pub fn as_secs(self) -> i64 {
        self.0
    }

    /// Parses strings of the form `(\d+w)?(\d+d)?(\d+h)?`, at least one
    /// group present. Every unset group contributes zero.
    pub fn parse(s: &str) -> Result<Self, String> {
        let caps = DURATION_RE
            .captures(s)
            .ok_or_else(|| format!("malformed duration {s:?}"))?;
        if caps.iter().skip(1).all(|g| g.is_none()) {
            return Err(format!("empty duration {s:?}"));
        }
        let weeks: i64 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| "bad week count".to_string())?;
        let days: i64 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| "bad day count".to_string())?;
        let hours: i64 = caps.get(3).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| "bad hour count".to_string())?;
        Ok(PlantDuration(weeks * 7 * 86400 + days * 86400 + hours * 3600))
    }
}

impl<'de> Deserialize<'de> for PlantDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PlantDuration::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plant {
    pub id: i64,
    pub names: HashMap<String, String>,
    pub germination: PlantDuration,
    pub harvest_from: PlantDuration,
    pub harvest_by: PlantDuration,
}

#[derive(Debug, Clone, Default)]
pub struct PlantCatalog {
    plants: HashMap<i64, Plant>,
}

impl PlantCatalog {
    pub fn load(path: &Path) -> Result<Self, PlantError> {
        let raw = fs::read_to_string(path).map_err(|source| PlantError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let plants: Vec<Plant> = serde_json::from_str(&raw).map_err(|source| PlantError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            plants: plants.into_iter().map(|p| (p.id, p)).collect(),
        })
    }

    pub fn get(&self, id: i64) -> Result<&Plant, PlantError> {
        self.plants.get(&id).ok_or(PlantError::UnknownPlant(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_weeks_days_hours() {
        assert_eq!(PlantDuration::parse("1w").unwrap().as_secs(), 168 * 3600);
        assert_eq!(PlantDuration::parse("1w1d").unwrap().as_secs(), 192 * 3600);
        assert_eq!(PlantDuration::parse("1w1d1h").unwrap().as_secs(), 193 * 3600);
        assert_eq!(PlantDuration::parse("1d1h").unwrap().as_secs(), 25 * 3600);
        assert_eq!(PlantDuration::parse("1h").unwrap().as_secs(), 3600);
    }

    #[test]
    fn rejects_empty_string() {
        assert!(PlantDuration::parse("").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(PlantDuration::parse("3x").is_err());
        assert!(PlantDuration::parse("1h1w").is_err());
    }

    #[test]
    fn catalog_get_reports_unknown_plant() {
        let catalog = PlantCatalog::default();
        let err = catalog.get(99).unwrap_err();
        matches!(err, PlantError::UnknownPlant(99));
    }

    #[test]
    fn catalog_loads_from_json() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("plants-test-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"id":1,"names":{"en":"Basil"},"germination":"1w","harvest_from":"3w","harvest_by":"5w"}]"#,
        )
        .unwrap();
        let catalog = PlantCatalog::load(&path).unwrap();
        let basil = catalog.get(1).unwrap();
        assert_eq!(basil.names["en"], "Basil");
        assert_eq!(basil.germination.as_secs(), 7 * 86400);
        std::fs::remove_file(&path).ok();
    }
}
