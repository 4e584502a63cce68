// ── Captive-portal baseline ──
//
// The fixed rule set every client sees before it pays: infrastructure
// services pass, HTTP is redirected to the portal, LAN traffic is
// masqueraded out the WAN, and everything else in FORWARD is dropped.
// Per-client rules are inserted at the head of the chains later, so the
// catch-all drop appended here stays last. The portal itself usually runs
// on the gateway, so its port is also opened in INPUT.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::RuleBackend;
use crate::error::Error;
use crate::rule::{Chain, ConnState, Policy, Protocol, Rule, Table, Target};

/// Comment carried by every baseline rule except the catch-all drop.
pub const BASELINE_TAG: &str = "pisowall:baseline";
/// Comment carried by the catch-all drop at the end of FORWARD.
pub const DEFAULT_DENY_TAG: &str = "pisowall:default-deny";

const ESTABLISHED: &[ConnState] = &[ConnState::Established, ConnState::Related];

/// Interfaces and portal endpoint the baseline is built around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalLayout {
    pub lan_interface: String,
    pub wan_interface: String,
    pub portal_ip: Ipv4Addr,
    pub portal_port: u16,
}

/// Which stateful match module ended up in the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StateMatch {
    Conntrack,
    State,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub state_match: StateMatch,
    pub rules_installed: usize,
}

/// Steps of a teardown that failed. Teardown never stops early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Live condition of the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineStatus {
    pub forward_rules: usize,
    pub default_deny_last: bool,
    pub redirect_present: bool,
    pub masquerade_present: bool,
    pub portal_input_present: bool,
}

impl BaselineStatus {
    pub fn is_intact(&self) -> bool {
        self.default_deny_last
            && self.redirect_present
            && self.masquerade_present
            && self.portal_input_present
    }
}

// ── CaptiveRuleSet ──────────────────────────────────────────────────

/// Installs, verifies and removes the baseline on a [`RuleBackend`].
#[derive(Clone)]
pub struct CaptiveRuleSet {
    backend: Arc<dyn RuleBackend>,
    layout: PortalLayout,
}

impl CaptiveRuleSet {
    pub fn new(backend: Arc<dyn RuleBackend>, layout: PortalLayout) -> Self {
        Self { backend, layout }
    }

    pub fn layout(&self) -> &PortalLayout {
        &self.layout
    }

    /// Accepts for DNS, DHCP, NTP and the portal itself.
    pub fn service_accepts(&self) -> Vec<Rule> {
        let lan = self.layout.lan_interface.as_str();
        let service = |proto: Protocol, port: u16| {
            Rule::new()
                .in_interface(lan)
                .protocol(proto)
                .dport(port)
                .comment(BASELINE_TAG)
                .jump(Target::Accept)
        };
        vec![
            service(Protocol::Udp, 53),
            service(Protocol::Tcp, 53),
            service(Protocol::Udp, 67),
            service(Protocol::Udp, 68),
            service(Protocol::Udp, 123),
            // Only matches when the portal runs on another host.
            Rule::new()
                .in_interface(lan)
                .destination(self.layout.portal_ip)
                .comment(BASELINE_TAG)
                .jump(Target::Accept),
        ]
    }

    /// Lets LAN clients reach a portal served by the gateway itself.
    /// Packets addressed to the gateway traverse INPUT, not FORWARD.
    pub fn portal_input_accept(&self) -> Rule {
        Rule::new()
            .in_interface(&self.layout.lan_interface)
            .destination(self.layout.portal_ip)
            .protocol(Protocol::Tcp)
            .dport(self.layout.portal_port)
            .comment(BASELINE_TAG)
            .jump(Target::Accept)
    }

    pub fn established_rule(with: StateMatch) -> Rule {
        let rule = Rule::new();
        let rule = match with {
            StateMatch::Conntrack => rule.ctstate(ESTABLISHED),
            StateMatch::State => rule.state(ESTABLISHED),
        };
        rule.comment(BASELINE_TAG).jump(Target::Accept)
    }

    pub fn redirect_rule(&self) -> Rule {
        Rule::new()
            .in_interface(&self.layout.lan_interface)
            .protocol(Protocol::Tcp)
            .dport(80)
            .comment(BASELINE_TAG)
            .jump(Target::Dnat(SocketAddrV4::new(
                self.layout.portal_ip,
                self.layout.portal_port,
            )))
    }

    pub fn masquerade_rule(&self) -> Rule {
        Rule::new()
            .out_interface(&self.layout.wan_interface)
            .comment(BASELINE_TAG)
            .jump(Target::Masquerade)
    }

    pub fn default_deny() -> Rule {
        Rule::new().comment(DEFAULT_DENY_TAG).jump(Target::Drop)
    }

    /// Install the baseline from scratch.
    ///
    /// Flushes FORWARD and the nat PREROUTING/POSTROUTING chains first, so
    /// any per-client rules are gone afterwards and must be re-applied.
    /// INPUT is left alone; the portal accept is added there only if it is
    /// missing.
    pub async fn setup(&self) -> Result<SetupReport, Error> {
        let backend = self.backend.as_ref();
        backend.flush(Table::Filter, Some(&Chain::Forward)).await?;
        backend.flush(Table::Nat, Some(&Chain::Prerouting)).await?;
        backend.flush(Table::Nat, Some(&Chain::Postrouting)).await?;

        let mut installed = 0;
        for rule in self.service_accepts() {
            backend.append(Table::Filter, &Chain::Forward, &rule).await?;
            installed += 1;
        }

        let portal = self.portal_input_accept();
        if !backend.exists(Table::Filter, &Chain::Input, &portal).await? {
            backend.append(Table::Filter, &Chain::Input, &portal).await?;
        }
        installed += 1;

        let conntrack = Self::established_rule(StateMatch::Conntrack);
        let state_match = match backend.append(Table::Filter, &Chain::Forward, &conntrack).await {
            Ok(()) => StateMatch::Conntrack,
            Err(e @ Error::CommandFailed { .. }) => {
                warn!(error = %e, "conntrack match rejected, falling back to -m state");
                let fallback = Self::established_rule(StateMatch::State);
                backend.append(Table::Filter, &Chain::Forward, &fallback).await?;
                StateMatch::State
            }
            Err(e) => return Err(e),
        };
        installed += 1;

        backend
            .append(Table::Nat, &Chain::Prerouting, &self.redirect_rule())
            .await?;
        backend
            .append(Table::Nat, &Chain::Postrouting, &self.masquerade_rule())
            .await?;
        backend
            .append(Table::Filter, &Chain::Forward, &Self::default_deny())
            .await?;
        installed += 3;

        info!(
            backend = backend.name(),
            lan = %self.layout.lan_interface,
            wan = %self.layout.wan_interface,
            portal = %self.layout.portal_ip,
            %state_match,
            "captive baseline installed"
        );
        Ok(SetupReport {
            state_match,
            rules_installed: installed,
        })
    }

    /// Open the gateway back up: ACCEPT policies, empty filter and nat
    /// tables, no custom chains. Every step runs even if one fails.
    pub async fn teardown(&self) -> TeardownReport {
        let backend = self.backend.as_ref();
        let mut report = TeardownReport::default();
        let mut record = |step: String, result: Result<(), Error>| {
            if let Err(e) = result {
                warn!(%step, error = %e, "teardown step failed");
                report.failures.push(format!("{step}: {e}"));
            } else {
                debug!(%step, "teardown step done");
            }
        };

        for chain in [Chain::Input, Chain::Forward, Chain::Output] {
            let result = backend
                .set_policy(Table::Filter, &chain, Policy::Accept)
                .await;
            record(format!("policy {chain} ACCEPT"), result);
        }
        for table in [Table::Filter, Table::Nat] {
            let result = backend.flush(table, None).await;
            record(format!("flush {table}"), result);
        }
        for table in [Table::Filter, Table::Nat] {
            let result = backend.delete_chains(table).await;
            record(format!("delete chains in {table}"), result);
        }

        if report.is_clean() {
            info!(backend = backend.name(), "captive baseline removed");
        }
        report
    }

    /// Inspect the live tables for the baseline's load-bearing rules.
    pub async fn verify(&self) -> Result<BaselineStatus, Error> {
        let backend = self.backend.as_ref();
        let input = backend.list(Table::Filter, &Chain::Input).await?;
        let forward = backend.list(Table::Filter, &Chain::Forward).await?;
        let prerouting = backend.list(Table::Nat, &Chain::Prerouting).await?;
        let postrouting = backend.list(Table::Nat, &Chain::Postrouting).await?;

        Ok(BaselineStatus {
            forward_rules: forward.len(),
            default_deny_last: forward
                .last()
                .is_some_and(|r| r.comment_tag() == Some(DEFAULT_DENY_TAG)),
            redirect_present: prerouting.iter().any(|r| r.target() == Some("DNAT")),
            masquerade_present: postrouting.iter().any(|r| r.target() == Some("MASQUERADE")),
            portal_input_present: input
                .iter()
                .any(|r| r.comment_tag() == Some(BASELINE_TAG) && r.target() == Some("ACCEPT")),
        })
    }
}
