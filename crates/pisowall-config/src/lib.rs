//! Shared configuration for the pisowall daemon and CLI.
//!
//! TOML file, `PISOWALL_*` environment overrides, validation, and
//! translation to `pisowall_core::EngineConfig`.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pisowall_core::{
    DhcpRange, Enforcement, EngineConfig, NetworkConfig, Rate, RateTable,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkSection,

    #[serde(default)]
    pub firewall: FirewallSection,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub rates: RatesSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkSection {
    /// Interface clients connect on.
    #[serde(default = "default_lan")]
    pub lan_interface: String,

    /// Upstream interface.
    #[serde(default = "default_wan")]
    pub wan_interface: String,

    /// Address the captive portal listens on.
    #[serde(default = "default_portal_ip")]
    pub portal_ip: String,

    #[serde(default = "default_portal_port")]
    pub portal_port: u16,

    /// Client address pool, e.g. "10.0.0.10-10.0.0.250".
    pub dhcp_range: Option<String>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            lan_interface: default_lan(),
            wan_interface: default_wan(),
            portal_ip: default_portal_ip(),
            portal_port: default_portal_port(),
            dhcp_range: Some(default_dhcp_range()),
        }
    }
}

fn default_lan() -> String {
    "wlan0".into()
}
fn default_wan() -> String {
    "eth0".into()
}
fn default_portal_ip() -> String {
    "10.0.0.1".into()
}
fn default_portal_port() -> u16 {
    80
}
fn default_dhcp_range() -> String {
    "10.0.0.10-10.0.0.250".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FirewallSection {
    /// Explicit iptables binary; searched for when unset.
    pub iptables_path: Option<PathBuf>,

    /// Keep rules in memory instead of calling iptables.
    #[serde(default)]
    pub simulate: bool,

    #[serde(default)]
    pub skip_capability_check: bool,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_command_retries")]
    pub command_retries: u32,
}

impl Default for FirewallSection {
    fn default() -> Self {
        Self {
            iptables_path: None,
            simulate: false,
            skip_capability_check: false,
            command_timeout_secs: default_command_timeout(),
            command_retries: default_command_retries(),
        }
    }
}

fn default_command_timeout() -> u64 {
    5
}
fn default_command_retries() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineSection {
    /// Seconds between reconciliation passes; 0 disables them.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Directory holding `sessions.json`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            state_dir: default_state_dir(),
        }
    }
}

fn default_reconcile_interval() -> u64 {
    30
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/pisowall")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RatesSection {
    #[serde(default = "default_time_per_peso")]
    pub time_per_peso: u32,

    /// Fixed price points.
    #[serde(default)]
    pub table: Vec<RateEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateEntry {
    pub pesos: u32,
    pub minutes: u32,
}

impl Default for RatesSection {
    fn default() -> Self {
        let rates = RateTable::default();
        Self {
            time_per_peso: rates.time_per_peso,
            table: rates
                .rates
                .iter()
                .map(|r| RateEntry {
                    pesos: r.pesos,
                    minutes: r.minutes,
                })
                .collect(),
        }
    }
}

fn default_time_per_peso() -> u32 {
    12
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "pisowall", "pisowall").map_or_else(
        || PathBuf::from("/etc/pisowall/config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing file is fine) with `PISOWALL_` environment
/// overrides on top, e.g. `PISOWALL_ENGINE__STATE_DIR`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PISOWALL_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and build the engine configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let net = &self.network;
        if net.lan_interface.trim().is_empty() {
            return Err(invalid("network.lan_interface", "must not be empty"));
        }
        if net.wan_interface.trim().is_empty() {
            return Err(invalid("network.wan_interface", "must not be empty"));
        }
        if net.lan_interface == net.wan_interface {
            return Err(invalid(
                "network.wan_interface",
                "must differ from network.lan_interface",
            ));
        }
        let portal_ip: Ipv4Addr = net.portal_ip.parse().map_err(|_| {
            invalid(
                "network.portal_ip",
                format!("'{}' is not an IPv4 address", net.portal_ip),
            )
        })?;
        if net.portal_port == 0 {
            return Err(invalid("network.portal_port", "must be non-zero"));
        }
        let dhcp_range = net.dhcp_range.as_deref().map(parse_range).transpose()?;

        let fw = &self.firewall;
        if fw.command_timeout_secs == 0 {
            return Err(invalid("firewall.command_timeout_secs", "must be at least 1"));
        }
        let enforcement = if fw.simulate {
            Enforcement::Simulated
        } else {
            Enforcement::Iptables {
                binary: fw.iptables_path.clone(),
                timeout: Duration::from_secs(fw.command_timeout_secs),
                retries: fw.command_retries,
                skip_capability_check: fw.skip_capability_check,
            }
        };

        Ok(EngineConfig {
            network: NetworkConfig {
                lan_interface: net.lan_interface.clone(),
                wan_interface: net.wan_interface.clone(),
                portal_ip,
                portal_port: net.portal_port,
                dhcp_range,
            },
            enforcement,
            rates: self.rates.to_rate_table()?,
            reconcile_interval: Duration::from_secs(self.engine.reconcile_interval_secs),
            state_dir: self.engine.state_dir.clone(),
        })
    }
}

impl RatesSection {
    fn to_rate_table(&self) -> Result<RateTable, ConfigError> {
        if self.time_per_peso == 0 {
            return Err(invalid("rates.time_per_peso", "must be at least 1"));
        }
        let mut rates: Vec<Rate> = Vec::with_capacity(self.table.len());
        for entry in &self.table {
            if entry.pesos == 0 || entry.minutes == 0 {
                return Err(invalid(
                    "rates.table",
                    format!("{} pesos for {} minutes is not a valid rate", entry.pesos, entry.minutes),
                ));
            }
            if rates.iter().any(|r| r.pesos == entry.pesos) {
                return Err(invalid(
                    "rates.table",
                    format!("more than one rate for {} pesos", entry.pesos),
                ));
            }
            rates.push(Rate {
                pesos: entry.pesos,
                minutes: entry.minutes,
            });
        }
        Ok(RateTable {
            time_per_peso: self.time_per_peso,
            rates,
        })
    }
}

fn parse_range(raw: &str) -> Result<DhcpRange, ConfigError> {
    let parse = |part: &str| {
        part.trim().parse::<Ipv4Addr>().map_err(|_| {
            invalid(
                "network.dhcp_range",
                format!("'{raw}' is not of the form START-END"),
            )
        })
    };
    let (start, end) = raw.split_once('-').ok_or_else(|| {
        invalid(
            "network.dhcp_range",
            format!("'{raw}' is not of the form START-END"),
        )
    })?;
    let range = DhcpRange {
        start: parse(start)?,
        end: parse(end)?,
    };
    if range.start > range.end {
        return Err(invalid("network.dhcp_range", "start is after end"));
    }
    Ok(range)
}
