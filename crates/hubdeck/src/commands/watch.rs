//! `hubdeck watch`: run a sync session and stream connection transitions,
//! notifications and device changes until Ctrl-C.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use futures_util::stream::select_all;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use hubdeck_core::{
    BroadcastSink, ConnectionSnapshot, EntityId, EntityState, HubConfig, Notification, SyncSession,
};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output::Painter;

pub async fn handle(hub: HubConfig, args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let url = hub.url.to_string();
    let sink = Arc::new(BroadcastSink::default());
    let mut notifications = sink.subscribe();
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

    let mut printer = Printer {
        painter: Painter::new(global.color),
        json: args.json,
        last: HashMap::new(),
    };
    let result = pump(&session, &mut printer, &mut notifications).await;
    session.shutdown().await;
    result
}

async fn pump(
    session: &SyncSession,
    printer: &mut Printer,
    notifications: &mut tokio::sync::broadcast::Receiver<Notification>,
) -> Result<(), CliError> {
    let mut connection = session.manager().watch();
    printer.connection(&connection.borrow_and_update().clone())?;

    // Each store stream yields its current snapshot first
    let mut changes = select_all(session.stores().map(|s| s.stream().into_stream()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("interrupted");
                return Ok(());
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = connection.borrow_and_update().clone();
                printer.connection(&snapshot)?;
            }
            note = notifications.recv() => match note {
                Ok(note) => printer.notification(&note)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notifications dropped"),
                Err(RecvError::Closed) => return Ok(()),
            },
            Some(snapshot) = changes.next() => {
                for state in snapshot.iter() {
                    printer.entity(state)?;
                }
            }
        }
    }
}

// ── Rendering ────────────────────────────────────────────────────────

struct Printer {
    painter: Painter,
    json: bool,
    /// Last state printed per entity; unchanged entities are skipped.
    last: HashMap<EntityId, Arc<EntityState>>,
}

impl Printer {
    fn connection(&self, snapshot: &ConnectionSnapshot) -> Result<(), CliError> {
        if self.json {
            emit_json("connection", snapshot)
        } else {
            println!("{} {}", self.painter.dim("hub"), self.painter.connection(snapshot));
            Ok(())
        }
    }

    fn notification(&self, note: &Notification) -> Result<(), CliError> {
        if self.json {
            emit_json("notification", note)
        } else {
            println!("{} {}", self.painter.dim("note"), self.painter.notification(note));
            Ok(())
        }
    }

    fn entity(&mut self, state: &Arc<EntityState>) -> Result<(), CliError> {
        if self.last.get(&state.entity_id).is_some_and(|prev| **prev == **state) {
            return Ok(());
        }
        self.last.insert(state.entity_id.clone(), Arc::clone(state));
        if self.json {
            emit_json("entity", &**state)
        } else {
            println!("{} {}", self.painter.dim("    "), self.painter.entity(state));
            Ok(())
        }
    }
}

/// One line of `--json` output.
#[derive(Serialize)]
struct Event<'a, T: Serialize + ?Sized> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
}

fn emit_json<T: Serialize + ?Sized>(kind: &str, data: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(&Event { kind, data })?);
    Ok(())
}
