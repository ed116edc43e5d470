//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hubdeck_config::ConfigError;
use hubdeck_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const READ_ONLY: i32 = 5;
    pub const COMMAND: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to hub at {url}")]
    #[diagnostic(
        code(hubdeck::connection_failed),
        help(
            "Check that the hub is running and reachable.\n\
             Reason: {reason}\n\
             Try: hubdeck status --insecure"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed")]
    #[diagnostic(
        code(hubdeck::auth_failed),
        help(
            "The hub rejected the access token.\n\
             Create a long-lived token in your hub profile settings and set \
             it with --token, HUBDECK_TOKEN or token_env in the profile."
        )
    )]
    AuthFailed { message: String },

    #[error("No access token configured for profile '{profile}'")]
    #[diagnostic(
        code(hubdeck::no_credentials),
        help("Set HUBDECK_TOKEN, pass --token, or add token_env to the profile.")
    )]
    NoCredentials { profile: String },

    // ── Devices ──────────────────────────────────────────────────────

    #[error("Unknown device '{device}'")]
    #[diagnostic(
        code(hubdeck::unknown_device),
        help("Run: hubdeck status to list configured devices")
    )]
    UnknownDevice { device: String },

    #[error("'{device}' is read-only")]
    #[diagnostic(
        code(hubdeck::read_only),
        help("Sensors can be watched but not set.")
    )]
    ReadOnly { device: String },

    #[error("Command for '{device}' failed: {message}")]
    #[diagnostic(
        code(hubdeck::command_failed),
        help("The hub did not apply the change; the device keeps its previous value.")
    )]
    CommandFailed { device: String, message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hubdeck::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hubdeck::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No hub configured")]
    #[diagnostic(
        code(hubdeck::no_config),
        help(
            "Pass --url and --token, or create a profile.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(hubdeck::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Timed out after {seconds}s waiting for {operation}")]
    #[diagnostic(
        code(hubdeck::timeout),
        help("Check hub responsiveness, or raise command_timeout_ms in the profile's [tuning].")
    )]
    Timeout { operation: String, seconds: u64 },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::UnknownDevice { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::ReadOnly { .. } => exit_code::READ_ONLY,
            Self::CommandFailed { .. } => exit_code::COMMAND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::ProfileNotFound { name, available } => {
                Self::ProfileNotFound { name, available }
            }
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Transport { reason } => Self::ConnectionFailed {
                url: "(hub)".into(),
                reason,
            },

            CoreError::NotConnected => Self::ConnectionFailed {
                url: "(hub)".into(),
                reason: "no active connection".into(),
            },

            CoreError::Timeout {
                operation,
                timeout_ms,
            } => Self::Timeout {
                operation,
                seconds: timeout_ms.div_ceil(1000),
            },

            CoreError::Authentication { message } => Self::AuthFailed { message },

            CoreError::Command { target, message } => Self::CommandFailed {
                device: target,
                message,
            },

            CoreError::ReadOnly { entity_id } => Self::ReadOnly { device: entity_id },

            CoreError::NotFound { entity_id } | CoreError::UnknownEntity { entity_id } => {
                Self::UnknownDevice { device: entity_id }
            }

            CoreError::Configuration { message } => Self::Validation {
                field: "configuration".into(),
                reason: message,
            },

            CoreError::StaleUpdate { entity_id, reason } => Self::Validation {
                field: entity_id,
                reason,
            },

            CoreError::Internal(message) => Self::Validation {
                field: "internal".into(),
                reason: message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let cases = [
            (CoreError::NotConnected, exit_code::CONNECTION),
            (
                CoreError::Authentication {
                    message: "bad".into(),
                },
                exit_code::AUTH,
            ),
            (
                CoreError::ReadOnly {
                    entity_id: "sensor.t".into(),
                },
                exit_code::READ_ONLY,
            ),
            (
                CoreError::UnknownEntity {
                    entity_id: "attic".into(),
                },
                exit_code::NOT_FOUND,
            ),
            (
                CoreError::Timeout {
                    operation: "command".into(),
                    timeout_ms: 1500,
                },
                exit_code::TIMEOUT,
            ),
        ];
        for (core, code) in cases {
            assert_eq!(CliError::from(core).exit_code(), code);
        }
    }

    #[test]
    fn timeout_rounds_up_to_whole_seconds() {
        let err = CliError::from(CoreError::Timeout {
            operation: "command".into(),
            timeout_ms: 1500,
        });
        assert!(matches!(err, CliError::Timeout { seconds: 2, .. }));
    }
}
