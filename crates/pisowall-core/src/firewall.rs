// ── Firewall rule driver ──
//
// Turns "this MAC may pass" / "this MAC may not pass" into per-client
// rules at the head of FORWARD and nat PREROUTING. Every rule it writes
// carries a comment naming the MAC, so a client's rules can be found and
// removed even when its IP has changed or been forgotten. Knows nothing
// about sessions.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use pisowall_netfilter::{
    Chain, Deletion, MemoryBackend, Protocol, Rule, RuleBackend, Table, Target,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::MacAddress;

/// Upper bound on deletions of one rule pattern per sweep.
pub const MAX_DUPLICATE_SWEEP: usize = 32;

const TAG_PREFIX: &str = "pisowall:";

/// Chains holding per-client rules.
const CLIENT_CHAINS: [(Table, Chain); 2] = [
    (Table::Filter, Chain::Forward),
    (Table::Nat, Chain::Prerouting),
];

/// The comment tag on every rule written for `mac`.
pub fn client_tag(mac: &MacAddress) -> String {
    format!("{TAG_PREFIX}{mac}")
}

/// Live rule state for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FirewallStatus {
    pub is_allowed: bool,
    pub allow_rule_count: usize,
    pub block_rule_count: usize,
}

impl fmt::Display for FirewallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} allow, {} block)",
            if self.is_allowed { "allowed" } else { "blocked" },
            self.allow_rule_count,
            self.block_rule_count
        )
    }
}

type Placement = (Table, Chain, Rule);

// ── FirewallDriver ───────────────────────────────────────────────────

/// Idempotent allow/block per client over a [`RuleBackend`].
///
/// Cheaply cloneable; all clones share the backend.
#[derive(Clone)]
pub struct FirewallDriver {
    backend: Arc<dyn RuleBackend>,
}

impl fmt::Debug for FirewallDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirewallDriver")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl FirewallDriver {
    pub fn new(backend: Arc<dyn RuleBackend>) -> Self {
        Self { backend }
    }

    /// A driver over an in-memory table. Nothing reaches the kernel.
    pub fn simulated() -> Self {
        warn!("firewall enforcement is SIMULATED: clients are not actually being filtered");
        Self::new(Arc::new(MemoryBackend::simulated()))
    }

    pub fn backend(&self) -> &Arc<dyn RuleBackend> {
        &self.backend
    }

    pub fn is_simulated(&self) -> bool {
        self.backend.is_simulated()
    }

    /// Check the backend can enforce at all.
    pub async fn probe(&self) -> Result<(), CoreError> {
        self.backend.probe().await.map_err(CoreError::from)
    }

    // ── Rule sets ────────────────────────────────────────────────────

    fn allow_rules(mac: &MacAddress, ip: Option<Ipv4Addr>) -> Vec<Placement> {
        let tag = client_tag(mac);
        let by_mac = || Rule::new().mac_source(mac.as_str());
        let mut rules = vec![
            (
                Table::Nat,
                Chain::Prerouting,
                by_mac().comment(&tag).jump(Target::Accept),
            ),
            (
                Table::Filter,
                Chain::Forward,
                by_mac().comment(&tag).jump(Target::Accept),
            ),
        ];
        if let Some(ip) = ip {
            rules.push((
                Table::Nat,
                Chain::Prerouting,
                Rule::new().source(ip).comment(&tag).jump(Target::Accept),
            ));
            rules.push((
                Table::Filter,
                Chain::Forward,
                Rule::new().source(ip).comment(&tag).jump(Target::Accept),
            ));
        }
        rules
    }

    fn block_rules(mac: &MacAddress, ip: Option<Ipv4Addr>) -> Vec<Placement> {
        let tag = client_tag(mac);
        let drop_from = |proto: Option<(Protocol, u16)>| {
            let rule = Rule::new().mac_source(mac.as_str());
            let rule = match proto {
                Some((proto, port)) => rule.protocol(proto).dport(port),
                None => rule,
            };
            (
                Table::Filter,
                Chain::Forward,
                rule.comment(&tag).jump(Target::Drop),
            )
        };
        let mut rules = vec![
            drop_from(None),
            drop_from(Some((Protocol::Udp, 53))),
            drop_from(Some((Protocol::Tcp, 53))),
            drop_from(Some((Protocol::Tcp, 80))),
            drop_from(Some((Protocol::Tcp, 443))),
        ];
        if let Some(ip) = ip {
            rules.push((
                Table::Filter,
                Chain::Forward,
                Rule::new().source(ip).comment(&tag).jump(Target::Drop),
            ));
            rules.push((
                Table::Filter,
                Chain::Forward,
                Rule::new().destination(ip).comment(&tag).jump(Target::Drop),
            ));
        }
        rules
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Let `mac` (and `ip`) through: clear its old rules, insert accepts
    /// that bypass the portal redirect and pass FORWARD, then read back.
    pub async fn allow(
        &self,
        mac: &MacAddress,
        ip: Option<Ipv4Addr>,
    ) -> Result<FirewallStatus, CoreError> {
        let wanted = Self::allow_rules(mac, ip);
        self.retract(mac, ip).await?;
        for (table, chain, rule) in &wanted {
            self.backend.insert_head(*table, chain, rule).await?;
        }

        let status = self.status(mac).await?;
        if !status.is_allowed || status.allow_rule_count != wanted.len() {
            return Err(CoreError::VerificationFailed {
                mac: mac.to_string(),
                expected: format!("allowed ({} allow, 0 block)", wanted.len()),
                observed: status.to_string(),
            });
        }
        debug!(%mac, ?ip, backend = self.backend.name(), "client allowed");
        Ok(status)
    }

    /// Stop `mac`: clear its accepts and insert drops for everything it
    /// sends, plus traffic to its last known `ip`, then read back.
    pub async fn block(
        &self,
        mac: &MacAddress,
        ip: Option<Ipv4Addr>,
    ) -> Result<FirewallStatus, CoreError> {
        let wanted = Self::block_rules(mac, ip);
        self.retract(mac, ip).await?;
        for (table, chain, rule) in &wanted {
            self.backend.insert_head(*table, chain, rule).await?;
        }

        let status = self.status(mac).await?;
        if status.is_allowed || status.allow_rule_count != 0 || status.block_rule_count != wanted.len()
        {
            return Err(CoreError::VerificationFailed {
                mac: mac.to_string(),
                expected: format!("blocked (0 allow, {} block)", wanted.len()),
                observed: status.to_string(),
            });
        }
        debug!(%mac, ?ip, backend = self.backend.name(), "client blocked");
        Ok(status)
    }

    /// Whether live rules let `mac` through. Any failure to read the rules
    /// answers `false`.
    pub async fn is_allowed(&self, mac: &MacAddress) -> bool {
        match self.status(mac).await {
            Ok(status) => status.is_allowed,
            Err(e) => {
                warn!(%mac, error = %e, "rule query failed, treating client as blocked");
                false
            }
        }
    }

    /// Count the tagged rules for `mac`. Allowed means at least one
    /// FORWARD accept and no drops.
    pub async fn status(&self, mac: &MacAddress) -> Result<FirewallStatus, CoreError> {
        let mut forward_accepts = 0;
        let mut status = FirewallStatus::default();
        for (table, chain, rule) in self.tagged_rules(mac).await? {
            match rule.target() {
                Some("ACCEPT") => {
                    status.allow_rule_count += 1;
                    if chain == Chain::Forward && table == Table::Filter {
                        forward_accepts += 1;
                    }
                }
                Some("DROP") => status.block_rule_count += 1,
                _ => {}
            }
        }
        status.is_allowed = forward_accepts > 0 && status.block_rule_count == 0;
        Ok(status)
    }

    /// Remove every rule for `mac`: the canonical allow and block patterns
    /// for `mac`/`ip`, and anything else carrying its tag.
    async fn retract(&self, mac: &MacAddress, ip: Option<Ipv4Addr>) -> Result<usize, CoreError> {
        let mut candidates = Self::allow_rules(mac, ip);
        candidates.extend(Self::block_rules(mac, ip));
        for found in self.tagged_rules(mac).await? {
            if !candidates.contains(&found) {
                candidates.push(found);
            }
        }

        let mut removed = 0;
        for (table, chain, rule) in &candidates {
            removed += self.sweep(*table, chain, rule).await?;
        }
        if removed > 0 {
            debug!(%mac, removed, "retracted client rules");
        }
        Ok(removed)
    }

    /// Delete `rule` until the backend reports no match, at most
    /// [`MAX_DUPLICATE_SWEEP`] times.
    async fn sweep(&self, table: Table, chain: &Chain, rule: &Rule) -> Result<usize, CoreError> {
        for removed in 0..MAX_DUPLICATE_SWEEP {
            if self.backend.delete(table, chain, rule).await? == Deletion::NoMatch {
                return Ok(removed);
            }
        }
        warn!(%table, %chain, %rule, "duplicate sweep limit reached");
        Ok(MAX_DUPLICATE_SWEEP)
    }

    async fn tagged_rules(&self, mac: &MacAddress) -> Result<Vec<Placement>, CoreError> {
        let tag = client_tag(mac);
        let mut found = Vec::new();
        for (table, chain) in &CLIENT_CHAINS {
            for rule in self.backend.list(*table, chain).await? {
                if rule.comment_tag() == Some(tag.as_str()) {
                    found.push((*table, chain.clone(), rule));
                }
            }
        }
        Ok(found)
    }
}
