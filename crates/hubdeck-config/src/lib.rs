//! Shared configuration for hubdeck front ends.
//!
//! TOML profiles, access-token resolution (env + keyring + plaintext),
//! and translation to `hubdeck_core::HubConfig`. The CLI layers its
//! flag overrides on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hubdeck_core::{EntityId, HubConfig, SyncTuning, TlsMode};

const KEYRING_SERVICE: &str = "hubdeck";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no access token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named hub profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Pick `name`, else the default profile, else the only profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let wanted = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());

        if let Some(profile) = self.profiles.get(&wanted) {
            return Ok((wanted, profile));
        }
        if name.is_none() && self.profiles.len() == 1 {
            if let Some((only, profile)) = self.profiles.iter().next() {
                return Ok((only.clone(), profile));
            }
        }

        Err(ConfigError::ProfileNotFound {
            name: wanted,
            available: if self.profiles.is_empty() {
                "none".into()
            } else {
                self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
            },
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    /// Try the push channel before polling.
    #[serde(default = "default_push")]
    pub push: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            push: default_push(),
            timeout: default_timeout(),
        }
    }
}

fn default_push() -> bool {
    true
}
fn default_timeout() -> u64 {
    10
}

/// A named hub profile.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Hub base URL (e.g., "http://homeassistant.local:8123").
    pub url: String,

    /// Long-lived access token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the access token.
    pub token_env: Option<String>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override push setting.
    pub push: Option<bool>,

    /// Override request timeout (seconds).
    pub timeout: Option<u64>,

    /// Logical device names grouped by domain:
    /// `[profiles.home.entities.light] door = "front_door"`.
    #[serde(default)]
    pub entities: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default)]
    pub tuning: TuningOverrides,
}

/// Optional `SyncTuning` overrides. Durations are in milliseconds.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TuningOverrides {
    pub debounce_ms: Option<u64>,
    pub grace_ms: Option<u64>,
    pub blocking_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_failure_threshold: Option<u32>,
    pub health_check_interval_ms: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub command_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub hidden_threshold_ms: Option<u64>,
    pub poll_failure_threshold: Option<u32>,
}

impl TuningOverrides {
    /// Layer these overrides over `base`.
    pub fn apply(&self, base: &SyncTuning) -> SyncTuning {
        let ms = |value: Option<u64>, fallback: Duration| value.map_or(fallback, Duration::from_millis);
        SyncTuning {
            debounce_window: ms(self.debounce_ms, base.debounce_window),
            grace_window: ms(self.grace_ms, base.grace_window),
            blocking_window: ms(self.blocking_ms, base.blocking_window),
            poll_interval: ms(self.poll_interval_ms, base.poll_interval),
            heartbeat_interval: ms(self.heartbeat_interval_ms, base.heartbeat_interval),
            heartbeat_failure_threshold: self
                .heartbeat_failure_threshold
                .unwrap_or(base.heartbeat_failure_threshold),
            health_check_interval: ms(self.health_check_interval_ms, base.health_check_interval),
            backoff_base: ms(self.backoff_base_ms, base.backoff_base),
            backoff_cap: ms(self.backoff_cap_ms, base.backoff_cap),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .unwrap_or(base.max_reconnect_attempts),
            command_timeout: ms(self.command_timeout_ms, base.command_timeout),
            connect_timeout: ms(self.connect_timeout_ms, base.connect_timeout),
            hidden_threshold: ms(self.hidden_threshold_ms, base.hidden_threshold),
            poll_failure_threshold: self
                .poll_failure_threshold
                .unwrap_or(base.poll_failure_threshold),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "hubdeck", "hubdeck").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hubdeck");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, layered over defaults and under
/// `HUBDECK_*` environment variables (`__` separates nested keys).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HUBDECK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// Resolve the access token from the credential chain.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
        .and_then(|entry| entry.set_password(token))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── Translation ─────────────────────────────────────────────────────

/// Flatten a profile's domain-grouped entity table into name → ID.
///
/// Bare object IDs get their group's domain prepended; full IDs must
/// belong to the group they are listed under.
pub fn resolve_entities(profile: &Profile) -> Result<BTreeMap<String, EntityId>, ConfigError> {
    let mut out = BTreeMap::new();
    for (domain, devices) in &profile.entities {
        for (name, raw) in devices {
            let full = if raw.contains('.') {
                raw.clone()
            } else {
                format!("{domain}.{raw}")
            };
            let id = EntityId::parse(&full).map_err(|e| ConfigError::Validation {
                field: format!("entities.{domain}.{name}"),
                reason: e.to_string(),
            })?;
            if id.domain_str() != domain {
                return Err(ConfigError::Validation {
                    field: format!("entities.{domain}.{name}"),
                    reason: format!("'{id}' is not a {domain} entity"),
                });
            }
            if out.insert(name.clone(), id).is_some() {
                return Err(ConfigError::Validation {
                    field: format!("entities.{domain}.{name}"),
                    reason: "device name is listed under more than one domain".into(),
                });
            }
        }
    }
    Ok(out)
}

/// Build a `HubConfig` from a profile without CLI flag overrides.
pub fn profile_to_hub_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<HubConfig, ConfigError> {
    let url = parse_profile_url(profile)?;

    let token = resolve_token(profile, profile_name)?;
    build_hub_config(profile, profile_name, defaults, url, token)
}

/// Like [`profile_to_hub_config`], with a token supplied by the caller
/// instead of the credential chain.
pub fn profile_to_hub_config_with_token(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    token: SecretString,
) -> Result<HubConfig, ConfigError> {
    let url = parse_profile_url(profile)?;
    build_hub_config(profile, profile_name, defaults, url, token)
}

fn parse_profile_url(profile: &Profile) -> Result<url::Url, ConfigError> {
    profile.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })
}

fn build_hub_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    url: url::Url,
    token: SecretString,
) -> Result<HubConfig, ConfigError> {
    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else {
        TlsMode::System
    };

    let timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    let base = SyncTuning {
        command_timeout: timeout,
        connect_timeout: timeout,
        ..SyncTuning::default()
    };

    let mut config = HubConfig::new(url, token);
    config.tls = tls;
    config.push_enabled = profile.push.unwrap_or(defaults.push);
    config.entities = resolve_entities(profile)?;
    config.tuning = profile.tuning.apply(&base);

    config.validate().map_err(|e| ConfigError::Validation {
        field: format!("profiles.{profile_name}"),
        reason: e.to_string(),
    })?;
    Ok(config)
}
