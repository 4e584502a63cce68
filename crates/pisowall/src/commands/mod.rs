//! Command dispatch: bridges CLI args -> engine operations -> output formatting.

pub mod config_cmd;
pub mod firewall;
pub mod reconcile;
pub mod serve;
pub mod sessions;
pub mod util;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an engine-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Serve(args) => serve::handle(args, global).await,
        Command::Firewall(args) => firewall::handle(args, global).await,
        Command::Sessions(args) => sessions::handle(args, global).await,
        Command::Reconcile(args) => reconcile::handle(args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command is not dispatched through the engine".into(),
        )),
    }
}
