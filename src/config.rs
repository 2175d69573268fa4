//! Server settings, read from `MOTORPOOL_*` environment variables.
//!
//! Numeric settings fall back to their defaults when they don't parse.
//! A bad UTC offset or fleet entry is a startup error.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;

use crate::limits::{MAX_CAR_NAME_LEN, MAX_MILEAGE};
use crate::model::Mileage;
use crate::time::{parse_offset, utc};

#[derive(Debug, Clone, PartialEq)]
pub struct FleetEntry {
    pub name: String,
    pub last_mileage: Mileage,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// New reservations are committed approved instead of pending.
    pub auto_approve: bool,
    /// Offset used to read and render timestamps that carry none.
    pub utc_offset: FixedOffset,
    /// Cars registered at startup if the store doesn't know them yet.
    pub fleet: Vec<FleetEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            auto_approve: false,
            utc_offset: utc(),
            fleet: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidOffset(String),
    InvalidFleetEntry(String),
    InvalidAddress(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidOffset(s) => {
                write!(f, "MOTORPOOL_UTC_OFFSET: invalid offset {s:?}")
            }
            ConfigError::InvalidFleetEntry(s) => write!(f, "MOTORPOOL_FLEET: invalid entry {s:?}"),
            ConfigError::InvalidAddress(s) => write!(f, "invalid listen address {s:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let utc_offset = match get("MOTORPOOL_UTC_OFFSET") {
            Some(s) => parse_offset(&s).ok_or(ConfigError::InvalidOffset(s))?,
            None => defaults.utc_offset,
        };
        let fleet = match get("MOTORPOOL_FLEET") {
            Some(s) => parse_fleet(&s)?,
            None => Vec::new(),
        };
        let auto_approve = get("MOTORPOOL_AUTO_APPROVE")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.auto_approve);

        Ok(Self {
            port: parsed(&get, "MOTORPOOL_PORT").unwrap_or(defaults.port),
            bind: get("MOTORPOOL_BIND").unwrap_or(defaults.bind),
            data_dir: get("MOTORPOOL_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            max_connections: parsed(&get, "MOTORPOOL_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "MOTORPOOL_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&get, "MOTORPOOL_METRICS_PORT"),
            auto_approve,
            utc_offset,
            fleet,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("motorpool.wal")
    }
}

/// Parse `key` as `T`, or `None` when unset or unparsable.
fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}

/// `Hilux=42000,Commuter,Van 2=1500.5`: comma-separated names, each with an
/// optional starting odometer reading (default 0).
pub fn parse_fleet(s: &str) -> Result<Vec<FleetEntry>, ConfigError> {
    let mut fleet: Vec<FleetEntry> = Vec::new();
    for raw in s.split(',') {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, mileage) = match entry.split_once('=') {
            Some((name, m)) => {
                let m: Mileage = m
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidFleetEntry(entry.to_string()))?;
                (name.trim(), m)
            }
            None => (entry, 0.0),
        };
        if name.is_empty()
            || name.len() > MAX_CAR_NAME_LEN
            || !mileage.is_finite()
            || !(0.0..=MAX_MILEAGE).contains(&mileage)
            || fleet.iter().any(|f| f.name == name)
        {
            return Err(ConfigError::InvalidFleetEntry(entry.to_string()));
        }
        fleet.push(FleetEntry {
            name: name.to_string(),
            last_mileage: mileage,
        });
    }
    Ok(fleet)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert!(!cfg.auto_approve);
        assert_eq!(cfg.utc_offset, utc());
        assert!(cfg.fleet.is_empty());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/motorpool.wal"));
        assert_eq!(cfg.listen_addr().unwrap().port(), 3001);
    }

    #[test]
    fn reads_every_setting() {
        let cfg = Config::from_lookup(lookup(&[
            ("MOTORPOOL_PORT", "4100"),
            ("MOTORPOOL_BIND", "127.0.0.1"),
            ("MOTORPOOL_DATA_DIR", "/var/lib/motorpool"),
            ("MOTORPOOL_MAX_CONNECTIONS", "8"),
            ("MOTORPOOL_COMPACT_THRESHOLD", "50"),
            ("MOTORPOOL_METRICS_PORT", "9100"),
            ("MOTORPOOL_AUTO_APPROVE", "true"),
            ("MOTORPOOL_UTC_OFFSET", "+07:00"),
            ("MOTORPOOL_FLEET", "Hilux=42000, Commuter"),
        ]))
        .unwrap();
        assert_eq!(cfg.listen_addr().unwrap().to_string(), "127.0.0.1:4100");
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/motorpool/motorpool.wal"));
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert!(cfg.auto_approve);
        assert_eq!(cfg.utc_offset.local_minus_utc(), 7 * 3600);
        assert_eq!(
            cfg.fleet,
            vec![
                FleetEntry { name: "Hilux".into(), last_mileage: 42000.0 },
                FleetEntry { name: "Commuter".into(), last_mileage: 0.0 },
            ]
        );
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("MOTORPOOL_PORT", "not-a-port"),
            ("MOTORPOOL_MAX_CONNECTIONS", "-3"),
            ("MOTORPOOL_METRICS_PORT", "99999"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.metrics_port, None);
    }

    #[test]
    fn bad_offset_is_an_error() {
        let err =
            Config::from_lookup(lookup(&[("MOTORPOOL_UTC_OFFSET", "Asia/Bangkok")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidOffset("Asia/Bangkok".into()));
    }

    #[test]
    fn fleet_rejects_bad_entries() {
        assert!(parse_fleet("Hilux=abc").is_err());
        assert!(parse_fleet("=100").is_err());
        assert!(parse_fleet("Hilux=-5").is_err());
        assert!(parse_fleet("Hilux,Hilux").is_err());
        assert_eq!(parse_fleet(" , ").unwrap(), vec![]);
    }
}
