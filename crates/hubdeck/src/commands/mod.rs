//! Command dispatch: bridges CLI args to the sync engine and output.

pub mod config_cmd;
pub mod control;
pub mod status;
pub mod watch;

use hubdeck_core::HubConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a hub-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, hub: HubConfig, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Status => status::handle(&hub, global).await,
        Command::Watch(args) => watch::handle(hub, &args, global).await,
        Command::Set(args) => control::set(hub, &args, global).await,
        Command::Toggle(args) => control::toggle(hub, &args, global).await,
        // Config is handled before dispatch
        Command::Config(_) => unreachable!(),
    }
}
