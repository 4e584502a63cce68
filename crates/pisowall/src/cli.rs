//! Clap derive structures for the `pisowall` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pisowall_core::MacAddress;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// pisowall -- access control for coin-operated WiFi hotspots
#[derive(Debug, Parser)]
#[command(
    name = "pisowall",
    version,
    about = "Control client access on a coin-operated WiFi hotspot",
    long_about = "Runs the session engine that lets paying clients through the captive\n\
        portal firewall, and gives operators one-shot commands to inspect and\n\
        adjust sessions and rules.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config path)
    #[arg(long, env = "PISOWALL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Keep firewall rules in memory instead of calling iptables
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "PISOWALL_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the engine: install the baseline, restore sessions, enforce
    /// expiries until interrupted
    Serve(ServeArgs),

    /// Manage captive-portal and per-client firewall rules
    #[command(alias = "fw")]
    Firewall(FirewallArgs),

    /// Manage client sessions
    #[command(alias = "s")]
    Sessions(SessionsArgs),

    /// Run one reconciliation pass and print what it corrected
    Reconcile(ReconcileArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Serve ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Override the reconciliation period (e.g. "30s", "2m"; "0s" disables)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub reconcile_interval: Option<Duration>,

    /// Remove the captive baseline when shutting down
    #[arg(long)]
    pub teardown_on_exit: bool,
}

// ── Firewall ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct FirewallArgs {
    #[command(subcommand)]
    pub command: FirewallCommand,
}

#[derive(Debug, Subcommand)]
pub enum FirewallCommand {
    /// Install the captive-portal baseline rules
    Setup,

    /// Remove all rules and restore ACCEPT policies
    Teardown,

    /// Check that the baseline is installed and in order
    Verify,

    /// Show the live rule status for one client
    Status {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
    },

    /// Let a client through, bypassing the portal
    Allow {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
        /// Client IP, for rules that match on address
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },

    /// Cut a client off
    Block {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
        /// Last known client IP
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },
}

// ── Sessions ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub command: SessionsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List live sessions
    #[command(alias = "ls")]
    List {
        /// Include ended sessions
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Show one session by MAC or IP
    Get {
        /// MAC address or IPv4 address
        client: String,
    },

    /// Start a paid session
    Start {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
        /// Coins inserted, in pesos
        pesos: u32,
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },

    /// Start a session for a fixed number of minutes (voucher)
    Grant {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
        minutes: u32,
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },

    /// Add minutes to a live session
    Extend {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
        minutes: u32,
    },

    /// Stop a session's clock and cut the client off
    Pause {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
    },

    /// Restart a paused session
    Resume {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
    },

    /// End a session and block the client
    End {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
    },

    /// Show the time left on a session
    Remaining {
        #[arg(value_parser = parse_mac)]
        mac: MacAddress,
    },
}

// ── Reconcile ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Only report clients whose rules disagree with their session
    #[arg(long)]
    pub dry_run: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (file + environment)
    Show,

    /// Print the configuration file path
    Path,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

fn parse_mac(raw: &str) -> Result<MacAddress, String> {
    MacAddress::parse(raw).map_err(|e| e.to_string())
}
