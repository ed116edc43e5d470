//! Terminal rendering helpers shared by the commands.

use std::io::{self, IsTerminal};

use owo_colors::OwoColorize;

use hubdeck_core::{ConnectionSnapshot, ConnectionState, EntityState, Notification};

use crate::cli::ColorMode;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Conditionally styled text.
#[derive(Debug, Clone, Copy)]
pub struct Painter {
    color: bool,
}

impl Painter {
    pub fn new(mode: ColorMode) -> Self {
        Self {
            color: should_color(mode),
        }
    }

    pub fn ok(self, text: &str) -> String {
        if self.color { text.green().to_string() } else { text.to_owned() }
    }

    pub fn warn(self, text: &str) -> String {
        if self.color { text.yellow().to_string() } else { text.to_owned() }
    }

    pub fn err(self, text: &str) -> String {
        if self.color { text.red().to_string() } else { text.to_owned() }
    }

    pub fn dim(self, text: &str) -> String {
        if self.color { text.dimmed().to_string() } else { text.to_owned() }
    }

    pub fn bold(self, text: &str) -> String {
        if self.color { text.bold().to_string() } else { text.to_owned() }
    }

    // ── Domain rendering ─────────────────────────────────────────────

    pub fn connection(self, snapshot: &ConnectionSnapshot) -> String {
        let label = match snapshot.state {
            ConnectionState::Connected => self.ok(&format!("connected ({})", snapshot.mode)),
            ConnectionState::Connecting => self.warn("connecting"),
            ConnectionState::Reconnecting { attempt } => {
                self.warn(&format!("reconnecting (attempt {attempt})"))
            }
            ConnectionState::Disconnected => self.err("disconnected"),
        };
        match snapshot.last_error {
            Some(ref e) if !snapshot.state.is_connected() => {
                format!("{label} {}", self.dim(&format!("- {e}")))
            }
            _ => label,
        }
    }

    pub fn entity(self, state: &EntityState) -> String {
        let name = state.name.as_deref().unwrap_or(state.entity_id.as_str());
        let mut line = format!(
            "{:<24} {:>8}",
            self.bold(name),
            format_value(state.display_value, state.unit.as_deref())
        );
        if state.is_pending {
            line.push_str(&format!(" {}", self.warn("pending")));
        }
        if state.has_error {
            line.push_str(&format!(" {}", self.err("failed")));
        }
        if let Some(ref playback) = state.playback {
            line.push_str(&format!(" {}", self.dim(&format!("-> {}", playback.name()))));
        }
        line
    }

    pub fn notification(self, notification: &Notification) -> String {
        match notification {
            Notification::Connected { mode } => self.ok(&format!("Connected via {mode}")),
            Notification::Disconnected => self.err("Disconnected from hub"),
            Notification::Reconnecting { attempt } => {
                self.warn(&format!("Reconnecting (attempt {attempt})"))
            }
            Notification::CommandFailed { entity_id, message } => {
                self.err(&format!("{entity_id}: {message}"))
            }
            Notification::SyncRestored => self.ok("Sync restored"),
            Notification::SetupFailed { reason } => self.err(&format!("Setup failed: {reason}")),
        }
    }
}

/// `42` → `42%`; sensors keep their unit and one decimal.
pub fn format_value(value: f64, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{value:.1} {unit}"),
        None => format!("{value:.0}%"),
    }
}
