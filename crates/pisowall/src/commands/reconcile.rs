//! One-shot reconciliation.

use pisowall_core::{Divergence, MacAddress, ReconcileReport};
use tabled::Tabled;

use crate::cli::{GlobalOpts, ReconcileArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct DivergenceRow {
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Expected")]
    expected: &'static str,
    #[tabled(rename = "Actual")]
    actual: &'static str,
    #[tabled(rename = "Allow rules")]
    allow_rules: usize,
    #[tabled(rename = "Block rules")]
    block_rules: usize,
}

fn access(allowed: bool) -> &'static str {
    if allowed { "allowed" } else { "blocked" }
}

fn divergence_row(d: &Divergence) -> DivergenceRow {
    DivergenceRow {
        mac: d.mac.to_string(),
        expected: access(d.should_be_allowed),
        actual: access(d.status.is_allowed),
        allow_rules: d.status.allow_rule_count,
        block_rules: d.status.block_rule_count,
    }
}

fn mac_list(list: &[MacAddress]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

fn summary(report: &ReconcileReport, color: bool) -> String {
    if report.is_clean() {
        return output::paint_flag(true, "Runtime, storage and firewall agree", color);
    }

    let mut lines = Vec::new();
    let mut section = |label: &str, macs: Vec<String>| {
        if !macs.is_empty() {
            lines.push(format!("{label:<15}{}", macs.join(", ")));
        }
    };
    section("Restored:", mac_list(&report.restored));
    section("Expired:", mac_list(&report.expired));
    section("Orphaned:", mac_list(&report.orphaned));
    section("Refreshed:", mac_list(&report.refreshed));
    section("Blocks retried:", mac_list(&report.retried_blocks));
    section(
        "Healed:",
        report
            .healed
            .iter()
            .map(|h| {
                let outcome = if h.succeeded() { "" } else { " (failed)" };
                format!("{} {}{outcome}", h.mac, h.action)
            })
            .collect(),
    );

    for error in &report.errors {
        lines.push(output::paint_flag(false, &format!("error: {error}"), color));
    }
    lines.join("\n")
}

pub async fn handle(args: ReconcileArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.dry_run {
        let manager = util::hydrated_manager(global).await?;
        let divergent = manager.audit().await;
        let out = output::render_list(
            &global.output,
            &divergent,
            divergence_row,
            |d| d.mac.to_string(),
        );
        output::print_output(&out, global.quiet);
        return Ok(());
    }

    // An empty runtime table: the pass restores every stored session.
    let config = util::engine_config(global)?;
    let firewall = config.build_firewall();
    let manager = util::open_manager(config, firewall)?;
    let report = manager.reconcile_now().await;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| summary(r, color),
        |r| r.corrections().to_string(),
    );
    output::print_output(&out, global.quiet);

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(CliError::Enforcement {
            message: format!("{} reconciliation step(s) failed", report.errors.len()),
        })
    }
}
