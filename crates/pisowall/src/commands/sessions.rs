//! Session command handlers.
//!
//! Each invocation loads the stored sessions, applies one transition and
//! exits. A running daemon picks the change up on its next
//! reconciliation pass.

use chrono::{DateTime, Local, Utc};
use pisowall_core::{Session, SessionManager};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{GlobalOpts, SessionsArgs, SessionsCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Remaining")]
    remaining: String,
    #[tabled(rename = "Ends")]
    ends: String,
    #[tabled(rename = "Pesos")]
    pesos: u32,
    #[tabled(rename = "Minutes")]
    minutes: u32,
}

impl SessionRow {
    fn new(s: &Session, now: DateTime<Utc>) -> Self {
        Self {
            mac: s.mac.to_string(),
            ip: s.ip.map(|ip| ip.to_string()).unwrap_or_default(),
            state: s.state().to_string(),
            remaining: if s.active {
                output::format_secs(s.remaining(now).num_seconds())
            } else {
                "-".into()
            },
            ends: local_time(s.ended_at.unwrap_or(s.end_time)),
            pesos: s.pesos_spent,
            minutes: s.minutes_granted,
        }
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn detail(s: &Session, now: DateTime<Utc>, color: bool) -> String {
    let mut lines = vec![
        format!("MAC:        {}", s.mac),
        format!(
            "IP:         {}",
            s.ip.map_or_else(|| "-".into(), |ip| ip.to_string())
        ),
        format!("State:      {}", output::paint_state(s.state(), color)),
        format!("Started:    {}", local_time(s.start_time)),
        format!("Ends:       {}", local_time(s.end_time)),
        format!(
            "Remaining:  {}",
            output::format_secs(s.remaining(now).num_seconds())
        ),
        format!("Pesos:      {}", s.pesos_spent),
        format!("Minutes:    {}", s.minutes_granted),
    ];
    if s.paused_ms > 0 {
        lines.push(format!(
            "Paused for: {}",
            output::format_secs(s.paused_duration().num_seconds())
        ));
    }
    if let Some(reason) = s.end_reason {
        lines.push(format!("Ended:      {reason}"));
    }
    lines.join("\n")
}

/// Time left on a session, for `remaining`.
#[derive(Serialize)]
struct Remaining {
    mac: String,
    remaining_secs: i64,
    paused: bool,
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: SessionsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let manager = util::hydrated_manager(global).await?;

    match args.command {
        SessionsCommand::List { all } => {
            let sessions = if all {
                manager.history().await?
            } else {
                manager.list_active()
            };
            let now = manager.now();
            let out = output::render_list(
                &global.output,
                &sessions,
                |s| SessionRow::new(s, now),
                |s| s.mac.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        SessionsCommand::Get { client } => {
            let session = util::find_session(&manager, &client)?;
            print_session(&manager, &session, global);
            Ok(())
        }

        SessionsCommand::Start { mac, pesos, ip } => {
            let session = manager.start(&mac, pesos, ip).await?;
            print_session(&manager, &session, global);
            Ok(())
        }

        SessionsCommand::Grant { mac, minutes, ip } => {
            let session = manager.start_minutes(&mac, minutes, ip).await?;
            print_session(&manager, &session, global);
            Ok(())
        }

        SessionsCommand::Extend { mac, minutes } => {
            let session = manager.extend(&mac, minutes).await?;
            print_session(&manager, &session, global);
            Ok(())
        }

        SessionsCommand::Pause { mac } => {
            let session = manager.pause(&mac).await?;
            print_session(&manager, &session, global);
            Ok(())
        }

        SessionsCommand::Resume { mac } => {
            let session = manager.resume(&mac).await?;
            print_session(&manager, &session, global);
            Ok(())
        }

        SessionsCommand::End { mac } => {
            match manager.end(&mac).await? {
                Some(session) => print_session(&manager, &session, global),
                None => {
                    if !global.quiet {
                        eprintln!("No active session for {mac}; client blocked");
                    }
                }
            }
            Ok(())
        }

        SessionsCommand::Remaining { mac } => {
            let session = util::find_session(&manager, mac.as_str())?;
            let remaining = Remaining {
                mac: mac.to_string(),
                remaining_secs: manager.time_remaining(&mac)?,
                paused: session.paused,
            };
            let out = output::render_single(
                &global.output,
                &remaining,
                |r| {
                    let left = output::format_secs(r.remaining_secs);
                    if r.paused {
                        format!("{left} (paused)")
                    } else {
                        left
                    }
                },
                |r| r.remaining_secs.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

fn print_session(manager: &SessionManager, session: &Session, global: &GlobalOpts) {
    let now = manager.now();
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        session,
        |s| detail(s, now, color),
        |s| s.mac.to_string(),
    );
    output::print_output(&out, global.quiet);
}
