// ── Runtime engine configuration ──
//
// These types describe how the engine enforces and meters access. They
// never touch disk: `pisowall-config` builds an `EngineConfig` from files
// and environment and hands it in.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pisowall_netfilter::{Iptables, IptablesConfig, PortalLayout};
use tracing::{error, warn};

use crate::firewall::FirewallDriver;
use crate::model::RateTable;

/// Inclusive range of addresses handed out by the DHCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl DhcpRange {
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (self.start..=self.end).contains(&ip)
    }
}

/// Where the gateway sits on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub lan_interface: String,
    pub wan_interface: String,
    pub portal_ip: Ipv4Addr,
    pub portal_port: u16,
    pub dhcp_range: Option<DhcpRange>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            lan_interface: "wlan0".into(),
            wan_interface: "eth0".into(),
            portal_ip: Ipv4Addr::new(10, 0, 0, 1),
            portal_port: 80,
            dhcp_range: Some(DhcpRange {
                start: Ipv4Addr::new(10, 0, 0, 10),
                end: Ipv4Addr::new(10, 0, 0, 250),
            }),
        }
    }
}

/// How rules reach the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enforcement {
    Iptables {
        /// Explicit binary; searched for when `None`.
        binary: Option<PathBuf>,
        timeout: Duration,
        retries: u32,
        /// Skip the startup probe for the tool and its match modules.
        skip_capability_check: bool,
    },
    /// In-memory rule table; nothing is enforced.
    Simulated,
}

impl Default for Enforcement {
    fn default() -> Self {
        Self::Iptables {
            binary: None,
            timeout: Duration::from_secs(5),
            retries: 2,
            skip_capability_check: false,
        }
    }
}

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub network: NetworkConfig,
    pub enforcement: Enforcement,
    pub rates: RateTable,
    /// Period of the reconciliation pass. Zero disables it.
    pub reconcile_interval: Duration,
    /// Directory holding the session file.
    pub state_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            enforcement: Enforcement::default(),
            rates: RateTable::default(),
            reconcile_interval: Duration::from_secs(30),
            state_dir: PathBuf::from("/var/lib/pisowall"),
        }
    }
}

impl EngineConfig {
    pub fn portal_layout(&self) -> PortalLayout {
        PortalLayout {
            lan_interface: self.network.lan_interface.clone(),
            wan_interface: self.network.wan_interface.clone(),
            portal_ip: self.network.portal_ip,
            portal_port: self.network.portal_port,
        }
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.state_dir.join("sessions.json")
    }

    pub fn skip_capability_check(&self) -> bool {
        matches!(
            self.enforcement,
            Enforcement::Iptables {
                skip_capability_check: true,
                ..
            }
        )
    }

    /// Build the firewall driver this configuration asks for.
    ///
    /// Falls back to simulation on platforms without netfilter. A missing
    /// iptables binary is not fatal here: the driver is still built and
    /// every operation reports the tool as unavailable.
    pub fn build_firewall(&self) -> FirewallDriver {
        let Enforcement::Iptables {
            binary,
            timeout,
            retries,
            ..
        } = &self.enforcement
        else {
            return FirewallDriver::simulated();
        };

        if cfg!(not(target_os = "linux")) {
            warn!("netfilter is only available on Linux");
            return FirewallDriver::simulated();
        }

        let located = IptablesConfig::locate(binary.as_deref());
        if located.is_none() {
            error!(
                configured = ?binary,
                "iptables binary not found; firewall operations will fail"
            );
        }
        let defaults = IptablesConfig::default();
        let iptables = Iptables::new(IptablesConfig {
            binary: located
                .or_else(|| binary.clone())
                .unwrap_or(defaults.binary),
            timeout: *timeout,
            retries: *retries,
            retry_backoff: defaults.retry_backoff,
        });
        FirewallDriver::new(Arc::new(iptables))
    }
}
