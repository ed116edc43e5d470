//! CLI-side configuration resolution: profile from the shared config
//! crate, then `--url` / `--token` / `--entity` / `-k` overrides.

use secrecy::SecretString;

use hubdeck_config::{Config, profile_to_hub_config, profile_to_hub_config_with_token};
use hubdeck_core::{EntityId, HubConfig, TlsMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The hub config this invocation should use, and the profile it came
/// from (`"flags"` when built from CLI flags alone).
pub fn build_hub_config(global: &GlobalOpts, cfg: &Config) -> Result<(String, HubConfig), CliError> {
    let selected = cfg.profile(global.profile.as_deref());

    let (name, mut hub) = match selected {
        Ok((name, profile)) => {
            // A flag token short-circuits the credential chain
            let mut hub = match global.token {
                Some(ref token) => profile_to_hub_config_with_token(
                    profile,
                    &name,
                    &cfg.defaults,
                    SecretString::from(token.clone()),
                )?,
                None => profile_to_hub_config(profile, &name, &cfg.defaults)?,
            };
            if let Some(ref url) = global.url {
                hub.url = parse_url(url)?;
            }
            (name, hub)
        }
        // An explicit --profile that doesn't exist is an error even with flags
        Err(e) if global.profile.is_some() || global.url.is_none() => {
            if global.url.is_none() && cfg.profiles.is_empty() {
                return Err(CliError::NoConfig {
                    path: hubdeck_config::config_path().display().to_string(),
                });
            }
            return Err(e.into());
        }
        Err(_) => ("flags".to_owned(), from_flags(global)?),
    };

    for spec in &global.entities {
        let (device, id) = parse_entity_spec(spec)?;
        hub.entities.insert(device, id);
    }
    if global.insecure {
        hub.tls = TlsMode::DangerAcceptInvalid;
    }
    if global.no_push {
        hub.push_enabled = false;
    }

    hub.validate()?;
    Ok((name, hub))
}

fn from_flags(global: &GlobalOpts) -> Result<HubConfig, CliError> {
    let url = global.url.as_deref().map(parse_url).transpose()?.ok_or_else(|| {
        CliError::NoConfig {
            path: hubdeck_config::config_path().display().to_string(),
        }
    })?;
    let token = global.token.clone().ok_or_else(|| CliError::NoCredentials {
        profile: "flags".into(),
    })?;
    Ok(HubConfig::new(url, SecretString::from(token)))
}

fn parse_url(raw: &str) -> Result<url::Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// `door=light.front_door` → (`door`, `light.front_door`); a bare entity
/// ID maps to itself.
pub fn parse_entity_spec(spec: &str) -> Result<(String, EntityId), CliError> {
    let (name, raw) = spec.split_once('=').unwrap_or((spec, spec));
    let id = EntityId::parse(raw.trim()).map_err(|e| CliError::Validation {
        field: "--entity".into(),
        reason: e.to_string(),
    })?;
    Ok((name.trim().to_owned(), id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["hubdeck"];
        argv.extend_from_slice(args);
        argv.push("status");
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn flags_alone_build_a_config() {
        let g = global(&[
            "--url",
            "http://hub.local:8123",
            "--token",
            "t0k",
            "-e",
            "door=light.front_door",
            "-e",
            "media_player.kitchen",
            "--no-push",
        ]);
        let (name, hub) = build_hub_config(&g, &Config::default()).unwrap();
        assert_eq!(name, "flags");
        assert!(!hub.push_enabled);
        assert_eq!(hub.resolve("door").unwrap().as_str(), "light.front_door");
        assert_eq!(
            hub.resolve("media_player.kitchen").unwrap().as_str(),
            "media_player.kitchen"
        );
    }

    #[test]
    fn nothing_configured_is_reported() {
        let g = global(&[]);
        assert!(matches!(
            build_hub_config(&g, &Config::default()),
            Err(CliError::NoConfig { .. })
        ));
    }

    #[test]
    fn url_without_token_lacks_credentials() {
        let g = global(&["--url", "http://hub.local:8123"]);
        assert!(matches!(
            build_hub_config(&g, &Config::default()),
            Err(CliError::NoCredentials { .. })
        ));
    }

    #[test]
    fn flag_token_overrides_profile() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            hubdeck_config::Profile {
                url: "http://hub.local:8123".into(),
                token_env: Some("HUBDECK_TEST_UNSET_TOKEN".into()),
                ..hubdeck_config::Profile::default()
            },
        );
        let g = global(&["--token", "override", "-k"]);
        let (name, hub) = build_hub_config(&g, &cfg).unwrap();
        assert_eq!(name, "default");
        assert!(matches!(hub.tls, TlsMode::DangerAcceptInvalid));
    }

    #[test]
    fn entity_specs() {
        let (name, id) = parse_entity_spec("door = light.front_door").unwrap();
        assert_eq!(name, "door");
        assert_eq!(id.as_str(), "light.front_door");
        assert!(parse_entity_spec("door=nodot").is_err());
    }
}
