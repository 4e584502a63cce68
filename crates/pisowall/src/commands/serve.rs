//! The enforcement daemon.
//!
//! Installs the captive baseline, restores persisted sessions and keeps
//! expiry and reconciliation running until SIGINT or SIGTERM.

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use pisowall_netfilter::CaptiveRuleSet;

use crate::cli::{GlobalOpts, OutputFormat, ServeArgs};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(args: ServeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut config = util::engine_config(global)?;
    if let Some(interval) = args.reconcile_interval {
        config.reconcile_interval = interval;
    }

    let firewall = config.build_firewall();
    if config.skip_capability_check() {
        warn!("firewall capability check skipped");
    } else {
        firewall.probe().await?;
    }

    let rules = CaptiveRuleSet::new(firewall.backend().clone(), config.portal_layout());
    let setup = rules.setup().await?;
    info!(
        backend = firewall.backend().name(),
        state_match = %setup.state_match,
        rules = setup.rules_installed,
        "captive baseline installed"
    );

    let manager = util::open_manager(config, firewall)?;
    let mut events = manager.events();

    let recovery = manager.recover().await?;
    info!(
        restored = recovery.restored.len(),
        paused = recovery.paused.len(),
        expired = recovery.expired.len(),
        errors = recovery.errors.len(),
        "persisted sessions recovered"
    );
    for error in &recovery.errors {
        warn!(error = %error, "recovery error");
    }

    manager.spawn_background().await;
    info!(
        sessions = manager.list_active().len(),
        reconcile_interval = ?manager.config().reconcile_interval,
        "pisowall running"
    );

    let json_events = matches!(
        global.output,
        OutputFormat::Json | OutputFormat::JsonCompact
    );
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if json_events {
                        output::print_output(&output::render_json(&event, true), global.quiet);
                    } else {
                        debug!(mac = %event.mac(), ?event, "session event");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("shutting down");
    manager.shutdown().await;

    if args.teardown_on_exit {
        let report = rules.teardown().await;
        if report.is_clean() {
            info!("captive baseline removed");
        } else {
            for failure in &report.failures {
                warn!(failure = %failure, "teardown step failed");
            }
        }
    }
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            return;
        }
    }

    let _ = tokio::signal::ctrl_c().await;
}
