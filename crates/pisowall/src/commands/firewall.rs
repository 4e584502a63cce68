//! Firewall command handlers.
//!
//! Direct access to the captive baseline and to per-client rules,
//! bypassing session state.

use pisowall_core::{EngineConfig, FirewallDriver, FirewallStatus};
use pisowall_netfilter::{BaselineStatus, CaptiveRuleSet};
use serde::Serialize;

use crate::cli::{FirewallArgs, FirewallCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Views ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SetupView {
    backend: &'static str,
    state_match: String,
    rules_installed: usize,
}

#[derive(Serialize)]
struct BaselineView {
    intact: bool,
    forward_rules: usize,
    default_deny_last: bool,
    redirect_present: bool,
    masquerade_present: bool,
    portal_input_present: bool,
}

impl From<BaselineStatus> for BaselineView {
    fn from(s: BaselineStatus) -> Self {
        Self {
            intact: s.is_intact(),
            forward_rules: s.forward_rules,
            default_deny_last: s.default_deny_last,
            redirect_present: s.redirect_present,
            masquerade_present: s.masquerade_present,
            portal_input_present: s.portal_input_present,
        }
    }
}

#[derive(Serialize)]
struct ClientRulesView {
    mac: String,
    #[serde(flatten)]
    status: FirewallStatus,
}

fn baseline_detail(v: &BaselineView, color: bool) -> String {
    let flag = |ok: bool| output::paint_flag(ok, if ok { "yes" } else { "no" }, color);
    [
        format!(
            "Baseline:           {}",
            output::paint_flag(v.intact, if v.intact { "intact" } else { "incomplete" }, color)
        ),
        format!("FORWARD rules:      {}", v.forward_rules),
        format!("Default deny last:  {}", flag(v.default_deny_last)),
        format!("Portal redirect:    {}", flag(v.redirect_present)),
        format!("Masquerade:         {}", flag(v.masquerade_present)),
        format!("Portal INPUT open:  {}", flag(v.portal_input_present)),
    ]
    .join("\n")
}

fn client_detail(v: &ClientRulesView, color: bool) -> String {
    let state = if v.status.is_allowed { "allowed" } else { "blocked" };
    [
        format!("MAC:          {}", v.mac),
        format!(
            "Status:       {}",
            output::paint_flag(v.status.is_allowed, state, color)
        ),
        format!("Allow rules:  {}", v.status.allow_rule_count),
        format!("Block rules:  {}", v.status.block_rule_count),
    ]
    .join("\n")
}

fn rule_set(config: &EngineConfig, firewall: &FirewallDriver) -> CaptiveRuleSet {
    CaptiveRuleSet::new(firewall.backend().clone(), config.portal_layout())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: FirewallArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = util::engine_config(global)?;
    let firewall = config.build_firewall();
    let color = output::should_color(&global.color);

    match args.command {
        FirewallCommand::Setup => {
            let report = rule_set(&config, &firewall).setup().await?;
            let view = SetupView {
                backend: firewall.backend().name(),
                state_match: report.state_match.to_string(),
                rules_installed: report.rules_installed,
            };
            let out = output::render_single(
                &global.output,
                &view,
                |v| {
                    format!(
                        "Installed {} baseline rules via {} (state match: {})",
                        v.rules_installed, v.backend, v.state_match
                    )
                },
                |v| v.rules_installed.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        FirewallCommand::Teardown => {
            if !util::confirm(
                "Remove all rules and open the firewall?",
                "firewall teardown",
                global.yes,
            )? {
                return Ok(());
            }
            let report = rule_set(&config, &firewall).teardown().await;
            if !report.is_clean() {
                return Err(CliError::Enforcement {
                    message: report.failures.join("; "),
                });
            }
            if !global.quiet {
                eprintln!("Firewall rules removed");
            }
            Ok(())
        }

        FirewallCommand::Verify => {
            let view = BaselineView::from(rule_set(&config, &firewall).verify().await?);
            let out = output::render_single(
                &global.output,
                &view,
                |v| baseline_detail(v, color),
                |v| v.intact.to_string(),
            );
            output::print_output(&out, global.quiet);
            if view.intact {
                Ok(())
            } else {
                Err(CliError::Enforcement {
                    message: "captive baseline is incomplete; run: pisowall firewall setup".into(),
                })
            }
        }

        FirewallCommand::Status { mac } => {
            let view = ClientRulesView {
                mac: mac.to_string(),
                status: firewall.status(&mac).await?,
            };
            let out = output::render_single(
                &global.output,
                &view,
                |v| client_detail(v, color),
                |v| v.status.is_allowed.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        FirewallCommand::Allow { mac, ip } => {
            firewall.allow(&mac, ip).await?;
            if !global.quiet {
                eprintln!("Client {mac} allowed");
            }
            Ok(())
        }

        FirewallCommand::Block { mac, ip } => {
            firewall.block(&mac, ip).await?;
            if !global.quiet {
                eprintln!("Client {mac} blocked");
            }
            Ok(())
        }
    }
}
