//! `hubdeck set` and `hubdeck toggle`: one user change pushed through a
//! short-lived sync session, reported once the hub has accepted it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use hubdeck_core::{
    BroadcastSink, CommandIntent, EntityId, EntityState, HubConfig, Notification, SyncSession,
};

use crate::cli::{GlobalOpts, SetArgs, ToggleArgs};
use crate::error::CliError;
use crate::output::{Painter, format_value};

pub async fn set(hub: HubConfig, args: &SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut run = Run::start(hub, global).await?;
    let outcome = match run.session.set(&args.device, args.value, CommandIntent::Discrete) {
        Ok(id) => run.settle(&args.device, &id, !args.no_verify).await,
        Err(e) => Err(e.into()),
    };
    run.session.shutdown().await;
    outcome
}

pub async fn toggle(hub: HubConfig, args: &ToggleArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut run = Run::start(hub, global).await?;
    let outcome = match run.session.toggle(&args.device) {
        Ok((id, target)) => {
            debug!(%id, target, "toggled");
            run.settle(&args.device, &id, !args.no_verify).await
        }
        Err(e) => Err(e.into()),
    };
    run.session.shutdown().await;
    outcome
}

// ── Session plumbing ─────────────────────────────────────────────────

struct Run {
    session: SyncSession,
    notifications: broadcast::Receiver<Notification>,
    painter: Painter,
}

impl Run {
    async fn start(hub: HubConfig, global: &GlobalOpts) -> Result<Self, CliError> {
        let url = hub.url.to_string();
        let sink = Arc::new(BroadcastSink::default());
        let notifications = sink.subscribe();
        let session = SyncSession::new(hub, sink);

        if !session.start().await {
            let reason = session
                .manager()
                .snapshot()
                .last_error
                .unwrap_or_else(|| "no transport could be opened".into());
            session.shutdown().await;
            return Err(CliError::ConnectionFailed { url, reason });
        }

        Ok(Self {
            session,
            notifications,
            painter: Painter::new(global.color),
        })
    }

    /// Wait until the entity's command is acknowledged or fails, then
    /// print where it landed.
    async fn settle(&mut self, device: &str, id: &EntityId, verify: bool) -> Result<(), CliError> {
        let (_, store) = self.session.resolve(id.as_str())?;
        let tuning = &self.session.config().tuning;
        let limit = tuning.command_timeout + tuning.debounce_window;

        let mut stream = store.stream();
        let waited = tokio::time::timeout(limit, async {
            loop {
                if let Some(state) = stream.get(id) {
                    if state.has_error || !state.is_pending {
                        return Some(state);
                    }
                }
                stream.changed().await?;
            }
        })
        .await;

        let state = match waited {
            Ok(Some(state)) => state,
            Ok(None) => {
                return Err(CliError::CommandFailed {
                    device: device.to_owned(),
                    message: "session closed before the hub answered".into(),
                });
            }
            Err(_) => {
                return Err(CliError::Timeout {
                    operation: format!("the hub to accept the change to {device}"),
                    seconds: whole_seconds(limit),
                });
            }
        };

        if state.has_error {
            return Err(CliError::CommandFailed {
                device: device.to_owned(),
                message: failure_message(&mut self.notifications, id),
            });
        }

        let state: Arc<EntityState> = if verify {
            store.refresh().await?;
            store.get(id).map_or(state, Arc::new)
        } else {
            state
        };

        println!(
            "{} {} {}",
            self.painter.ok("✓"),
            self.painter.bold(device),
            format_value(state.display_value, state.unit.as_deref()),
        );
        Ok(())
    }
}

/// The hub's reason for the most recent failure of `id`, if it was
/// broadcast.
fn failure_message(notifications: &mut broadcast::Receiver<Notification>, id: &EntityId) -> String {
    let mut message = None;
    while let Ok(note) = notifications.try_recv() {
        match note {
            Notification::CommandFailed { entity_id, message: m } if &entity_id == id => {
                message = Some(m);
            }
            _ => {}
        }
    }
    message.unwrap_or_else(|| "the hub rejected the command".into())
}

fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hubdeck_core::NotificationSink;

    #[test]
    fn failure_message_prefers_the_matching_notification() {
        let sink = BroadcastSink::default();
        let mut rx = sink.subscribe();
        let door = EntityId::parse("light.door").unwrap();
        sink.notify(Notification::CommandFailed {
            entity_id: EntityId::parse("light.hall").unwrap(),
            message: "other".into(),
        });
        sink.notify(Notification::CommandFailed {
            entity_id: door.clone(),
            message: "HTTP 500: boom".into(),
        });
        assert_eq!(failure_message(&mut rx, &door), "HTTP 500: boom");
        assert_eq!(failure_message(&mut rx, &door), "the hub rejected the command");
    }

    #[test]
    fn partial_seconds_round_up() {
        assert_eq!(whole_seconds(Duration::from_millis(10_300)), 11);
        assert_eq!(whole_seconds(Duration::from_secs(10)), 10);
    }
}
