//! Clap derive structures for the `hubdeck` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hubdeck -- a terminal dashboard for your home-automation hub
#[derive(Debug, Parser)]
#[command(
    name = "hubdeck",
    version,
    about = "Watch and control smart-home devices from the command line",
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
    /// Hub profile to use
    #[arg(long, short = 'p', env = "HUBDECK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Hub URL (overrides profile)
    #[arg(long, short = 'u', env = "HUBDECK_URL", global = true)]
    pub url: Option<String>,

    /// Long-lived access token
    #[arg(long, env = "HUBDECK_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Map a device name to an entity (`door=light.front_door`, or a bare
    /// entity ID). Repeatable.
    #[arg(long = "entity", short = 'e', global = true, value_name = "NAME=ENTITY_ID")]
    pub entities: Vec<String>,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "HUBDECK_INSECURE", global = true)]
    pub insecure: bool,

    /// Skip the push channel and poll only
    #[arg(long, global = true)]
    pub no_push: bool,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check hub reachability and show configured devices
    #[command(alias = "st")]
    Status,

    /// Stream connection transitions and device changes until Ctrl-C
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Set a light's brightness or a speaker's volume (0-100)
    Set(SetArgs),

    /// Toggle a device on or off
    #[command(alias = "t")]
    Toggle(ToggleArgs),

    /// Inspect CLI configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Emit one JSON object per change instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Device name (or entity ID)
    pub device: String,

    /// Target level, 0-100
    #[arg(value_parser = parse_level)]
    pub value: f64,

    /// Skip reading the value back once the hub accepts the command
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Debug, Args)]
pub struct ToggleArgs {
    /// Device name (or entity ID)
    pub device: String,

    /// Skip reading the value back once the hub accepts the command
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,
    /// Print the resolved configuration (secrets masked)
    Show,
}

fn parse_level(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside 0-100"))
    }
}
