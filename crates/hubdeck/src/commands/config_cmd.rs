//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

const MASK: &str = "********";

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", hubdeck_config::config_path().display());
            Ok(())
        }
        ConfigCommand::Show => {
            let mut cfg = hubdeck_config::load_config()?;
            if let Some(ref name) = global.profile {
                // Validates the name; the full file is still printed
                cfg.profile(Some(name))?;
            }
            for profile in cfg.profiles.values_mut() {
                if profile.token.is_some() {
                    profile.token = Some(MASK.to_owned());
                }
            }
            let rendered = toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            })?;
            print!("{rendered}");
            Ok(())
        }
    }
}
