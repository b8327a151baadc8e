//! TOML config file loading plus environment overrides (§4.13). Malformed
//! configuration is startup-fatal; every optional field falls back to the
//! default named here rather than propagating `Option` into the rest of
//! the process.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::persistence::DEFAULT_BACKUP_COUNT;

const DEFAULT_BROKER_PORT: u16 = 1883;
const DEFAULT_SUNRISE_SEC: i32 = 7 * 3600;
const DEFAULT_PERSIST_DIR: &str = ".";
const DEFAULT_PLANTS_PATH: &str = "plants.json";
const DEFAULT_WEB_PORT: u16 = 8080;

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    devices: Vec<String>,
    #[serde(default)]
    broker_host: Option<String>,
    #[serde(default)]
    broker_port: Option<u16>,
    #[serde(default)]
    broker_user: Option<String>,
    #[serde(default)]
    broker_pass: Option<String>,
    #[serde(default)]
    broker_ca_path: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    sunrise: Option<String>,
    #[serde(default)]
    persist_dir: Option<String>,
    #[serde(default)]
    backup_count: Option<usize>,
    #[serde(default)]
    plants_path: Option<String>,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default)]
    web_port: Option<u16>,
}

/// Fully resolved process configuration: every field here is either present
/// in the TOML file, overridden by an environment variable, or filled with
/// the documented default (§4.13).
#[derive(Debug, Clone)]
pub struct Config {
    pub devices: Vec<String>,
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_user: Option<String>,
    pub broker_pass: Option<String>,
    pub broker_ca_path: Option<PathBuf>,
    pub timezone: String,
    pub sunrise_sec: i32,
    pub persist_dir: PathBuf,
    pub backup_count: usize,
    pub plants_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub web_addr: SocketAddr,
}

/// Parses `HH:MM` into seconds-past-midnight.
fn parse_sunrise(s: &str) -> Result<i32> {
    let (h, m) = s
        .split_once(':')
        .with_context(|| format!("sunrise {s:?} is not HH:MM"))?;
    let h: i32 = h.parse().with_context(|| format!("bad sunrise hour in {s:?}"))?;
    let m: i32 = m.parse().with_context(|| format!("bad sunrise minute in {s:?}"))?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        anyhow::bail!("sunrise {s:?} out of range");
    }
    Ok(h * 3600 + m * 60)
}

/// Best-effort host timezone name, falling back to UTC if the platform
/// can't tell us (matches §4.13's "falls back to the host's local timezone").
fn host_timezone() -> String {
    std::fs::read_link("/etc/localtime")
        .ok()
        .and_then(|p| {
            let s = p.to_string_lossy();
            s.split("zoneinfo/").nth(1).map(str::to_string)
        })
        .unwrap_or_else(|| "UTC".to_string())
}

/// Reads and parses a TOML config file, then layers environment overrides
/// and defaults on top. `path` missing entirely falls back to an empty
/// config (all fields take their documented defaults).
pub fn load(path: &str) -> Result<Config> {
    let raw: RawConfig = match std::fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
        Err(e) => return Err(e).with_context(|| format!("failed to read config: {path}")),
    };

    let devices: Vec<String> = env::var("PLANTPRISM_DEVICES")
        .ok()
        .map(|s| s.split(',').map(|d| d.trim().to_lowercase()).filter(|d| !d.is_empty()).collect())
        .unwrap_or(raw.devices)
        .into_iter()
        .map(|d| d.to_lowercase())
        .collect();

    let broker_host = env::var("PLANTPRISM_BROKER_HOST")
        .ok()
        .or(raw.broker_host)
        .unwrap_or_else(|| "127.0.0.1".to_string());

    let broker_port = env::var("PLANTPRISM_BROKER_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(raw.broker_port)
        .unwrap_or(DEFAULT_BROKER_PORT);

    let broker_user = env::var("PLANTPRISM_BROKER_USER").ok().or(raw.broker_user);
    let broker_pass = env::var("PLANTPRISM_BROKER_PASS").ok().or(raw.broker_pass);

    let broker_ca_path = env::var("PLANTPRISM_BROKER_CA")
        .ok()
        .or(raw.broker_ca_path)
        .map(PathBuf::from);

    let timezone = env::var("PLANTPRISM_TIMEZONE")
        .ok()
        .or(raw.timezone)
        .unwrap_or_else(host_timezone);

    let sunrise_sec = match env::var("PLANTPRISM_SUNRISE").ok().or(raw.sunrise) {
        Some(s) => parse_sunrise(&s)?,
        None => DEFAULT_SUNRISE_SEC,
    };

    let persist_dir = env::var("PLANTPRISM_PERSIST_DIR")
        .ok()
        .or(raw.persist_dir)
        .unwrap_or_else(|| DEFAULT_PERSIST_DIR.to_string())
        .into();

    let backup_count = env::var("PLANTPRISM_BACKUP_COUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(raw.backup_count)
        .unwrap_or(DEFAULT_BACKUP_COUNT);

    let plants_path = env::var("PLANTPRISM_PLANTS_PATH")
        .ok()
        .or(raw.plants_path)
        .unwrap_or_else(|| DEFAULT_PLANTS_PATH.to_string())
        .into();

    let log_file = env::var("PLANTPRISM_LOG_FILE").ok().or(raw.log_file).map(PathBuf::from);

    let web_port = env::var("PLANTPRISM_WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(raw.web_port)
        .unwrap_or(DEFAULT_WEB_PORT);

    Ok(Config {
        devices,
        broker_host,
        broker_port,
        broker_user,
        broker_pass,
        broker_ca_path,
        timezone,
        sunrise_sec,
        persist_dir,
        backup_count,
        plants_path,
        log_file,
        web_addr: SocketAddr::from(([0, 0, 0, 0], web_port)),
    })
}
