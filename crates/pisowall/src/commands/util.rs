//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use pisowall_config::Config;
use pisowall_core::{
    Enforcement, EngineConfig, FirewallDriver, JsonFileRepository, MacAddress, Session,
    SessionManager,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file this invocation reads: `--config` or the platform path.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(pisowall_config::config_path)
}

/// Load the file + environment configuration.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(pisowall_config::load_config_from(&config_file(global))?)
}

/// Validated engine configuration with CLI overrides applied.
pub fn engine_config(global: &GlobalOpts) -> Result<EngineConfig, CliError> {
    let mut config = load_config(global)?.to_engine_config()?;
    if global.simulate {
        config.enforcement = Enforcement::Simulated;
    }
    Ok(config)
}

/// A session manager over the configured session file.
pub fn open_manager(
    config: EngineConfig,
    firewall: FirewallDriver,
) -> Result<SessionManager, CliError> {
    let repo = JsonFileRepository::open(config.sessions_file())?;
    Ok(SessionManager::new(config, Arc::new(repo), firewall))
}

/// A manager loaded with the stored sessions, for one-shot commands.
pub async fn hydrated_manager(global: &GlobalOpts) -> Result<SessionManager, CliError> {
    let config = engine_config(global)?;
    let firewall = config.build_firewall();
    let manager = open_manager(config, firewall)?;
    let loaded = manager.hydrate().await?;
    tracing::debug!(loaded, "stored sessions loaded");
    Ok(manager)
}

/// Find a live session by MAC or IPv4 address.
pub fn find_session(manager: &SessionManager, identifier: &str) -> Result<Session, CliError> {
    let found = if let Ok(ip) = identifier.parse::<Ipv4Addr>() {
        manager.get_session_by_ip(ip)
    } else {
        let mac = MacAddress::parse(identifier)?;
        manager.get_session(&mac)
    };
    found.ok_or_else(|| CliError::NotFound {
        identifier: identifier.into(),
    })
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}
