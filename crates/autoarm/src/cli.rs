//! Clap derive structures for the `autoarm` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// autoarm -- keep an alarm panel in the state the household needs
#[derive(Debug, Parser)]
#[command(
    name = "autoarm",
    version,
    about = "Alarm panel state reconciliation from occupancy, sun and calendars",
    long_about = "Validates autoarm configuration and runs the reconciliation engine\n\
        against a simulated home, showing which alarm state it would choose.",
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
    /// Configuration file (.toml, .yaml or .yml)
    #[arg(long, short = 'c', env = "AUTOARM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// TOML
    Toml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect and validate configuration
    #[command(alias = "cfg")]
    Config(ConfigArgs),

    /// Run one reconciliation against a simulated home
    Reset(ResetArgs),

    /// List the alarm states and how the engine treats them
    States,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Load and validate the configuration
    Validate,

    /// Show the effective configuration after defaults and overrides
    Show,

    /// Print the configuration file path
    Path,
}

// ── Reset ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Panel state before reconciling
    #[arg(long, default_value = "disarmed")]
    pub panel: String,

    /// Occupants at home; every other configured occupant is away
    #[arg(long = "home", value_name = "ENTITY_ID")]
    pub home: Vec<String>,

    /// Sun below the horizon
    #[arg(long)]
    pub night: bool,

    /// A calendar event running now, as CALENDAR=SUMMARY
    #[arg(long = "event", value_name = "CALENDAR=SUMMARY")]
    pub events: Vec<String>,
}
