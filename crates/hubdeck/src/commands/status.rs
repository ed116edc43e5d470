//! `hubdeck status`: one-shot reachability check and device readout.
//!
//! Talks to the hub REST API directly; no sync session is started.

use hubdeck_api::{HubClient, TransportConfig};
use hubdeck_core::{CoreError, EntityState, HubConfig, RemoteReading};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::Painter;

pub async fn handle(hub: &HubConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let painter = Painter::new(global.color);
    let transport = TransportConfig {
        tls: hub.tls.clone(),
        timeout: hub.tuning.connect_timeout,
    };
    let client = HubClient::new(hub.url.clone(), &hub.access_token, &transport)
        .map_err(|e| hub_error(hub, e))?;

    client.ping().await.map_err(|e| hub_error(hub, e))?;
    let probe = client.test_connection().await;

    println!(
        "{} {} {}",
        painter.ok("●"),
        painter.bold(hub.url.as_str()),
        painter.dim(&format!(
            "(version {})",
            probe.version.as_deref().unwrap_or("unknown")
        )),
    );

    if hub.entities.is_empty() {
        println!("{}", painter.dim("No devices configured. Add some with --entity NAME=ENTITY_ID."));
        return Ok(());
    }

    let ids: Vec<String> = hub.entities.values().map(ToString::to_string).collect();
    let states = client.get_states(&ids).await.map_err(|e| hub_error(hub, e))?;

    for (name, id) in &hub.entities {
        let line = match states.get(id.as_str()) {
            Some(raw) => {
                let reading = RemoteReading::from_hub(id, raw);
                let mut state = EntityState::new(id.clone());
                state.name = reading.name.or_else(|| Some(name.clone()));
                state.unit = reading.unit;
                state.playback = reading.playback;
                match reading.value {
                    Some(value) => {
                        state.display_value = value;
                        painter.entity(&state)
                    }
                    None => format!("{:<24} {}", painter.bold(name), painter.warn("unavailable")),
                }
            }
            None => format!("{:<24} {}", painter.bold(name), painter.err("not found")),
        };
        println!("  {line}  {}", painter.dim(id.as_str()));
    }
    Ok(())
}

/// Core mapping, with the hub URL filled in for connection failures.
fn hub_error(hub: &HubConfig, err: hubdeck_api::Error) -> CliError {
    match CliError::from(CoreError::from(err)) {
        CliError::ConnectionFailed { reason, .. } => CliError::ConnectionFailed {
            url: hub.url.to_string(),
            reason,
        },
        other => other,
    }
}
