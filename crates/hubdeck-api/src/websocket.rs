//! WebSocket push channel.
//!
//! Connects to the hub's `/api/websocket` endpoint, authenticates with the
//! access token, subscribes to `state_changed` events and streams parsed
//! [`StateChange`]s through a [`tokio::sync::broadcast`] channel.
//!
//! Unlike a self-healing stream, this channel does **not** reconnect on its
//! own: when the socket drops, [`PushChannel::is_alive`] flips to `false`
//! and the owner decides how to recover.
//!
//! # Example
//!
//! ```rust,ignore
//! use hubdeck_api::websocket::PushChannel;
//! use tokio_util::sync::CancellationToken;
//!
//! let ws_url = PushChannel::url_for(&"http://hub.local:8123".parse()?)?;
//! let channel = PushChannel::connect(ws_url, &token, CancellationToken::new()).await?;
//! let mut rx = channel.subscribe();
//!
//! while let Ok(change) = rx.recv().await {
//!     println!("{} -> {:?}", change.entity_id, change.new_state.as_ref().map(|s| &s.state));
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::models::{HubEntityState, StateChange};

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Message ID of the `state_changed` subscription request.
const SUBSCRIBE_ID: u64 = 1;

// ── Wire messages ────────────────────────────────────────────────────

/// Inbound frame. Everything the channel doesn't act on lands in `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    AuthRequired,
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        error: Option<serde_json::Value>,
    },
    Event {
        event: WsEvent,
    },
    Pong {
        id: u64,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WsEvent {
    #[serde(default)]
    event_type: Option<String>,
    data: WsEventData,
}

#[derive(Debug, Deserialize)]
struct WsEventData {
    entity_id: String,
    #[serde(default)]
    new_state: Option<HubEntityState>,
}

// ── PushChannel ──────────────────────────────────────────────────────

/// Handle to an authenticated, subscribed WebSocket connection.
pub struct PushChannel {
    event_rx: broadcast::Receiver<Arc<StateChange>>,
    outbound: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    last_pong: watch::Receiver<u64>,
    hub_version: Option<String>,
    cancel: CancellationToken,
}

impl PushChannel {
    /// Derive the WebSocket endpoint from the hub base URL
    /// (`http` → `ws`, `https` → `wss`, path `/api/websocket`).
    pub fn url_for(base_url: &Url) -> Result<Url, Error> {
        let scheme = match base_url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(Error::WebSocketConnect(format!(
                    "unsupported URL scheme for WebSocket: {other}"
                )));
            }
        };
        let host = base_url
            .host_str()
            .ok_or_else(|| Error::WebSocketConnect("hub URL has no host".into()))?;
        let url = match base_url.port() {
            Some(p) => format!("{scheme}://{host}:{p}/api/websocket"),
            None => format!("{scheme}://{host}/api/websocket"),
        };
        Ok(Url::parse(&url)?)
    }

    /// Connect, authenticate and subscribe to `state_changed` events.
    ///
    /// Resolves only after the hub acknowledged the subscription, so a
    /// returned channel is known to be live. The background reader stops
    /// when `cancel` fires or the socket drops.
    pub async fn connect(
        ws_url: Url,
        token: &SecretString,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        tracing::info!(url = %ws_url, "Connecting push channel");

        let (mut ws, _response) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        // ── Handshake: auth_required → auth → auth_ok ──
        let mut hub_version = None;
        loop {
            let text = next_text(&mut ws).await?;
            match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::AuthRequired) => {
                    let auth = serde_json::json!({
                        "type": "auth",
                        "access_token": token.expose_secret(),
                    });
                    ws.send(Message::text(auth.to_string()))
                        .await
                        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                }
                Ok(WsMessage::AuthOk { ha_version }) => {
                    hub_version = ha_version;
                    break;
                }
                Ok(WsMessage::AuthInvalid { message }) => {
                    return Err(Error::Authentication {
                        message: message.unwrap_or_else(|| "auth_invalid".into()),
                    });
                }
                Ok(_) => tracing::trace!("ignoring pre-auth frame"),
                Err(e) => tracing::debug!(error = %e, "unparseable pre-auth frame"),
            }
        }

        // ── Subscribe to state changes ──
        let subscribe = serde_json::json!({
            "id": SUBSCRIBE_ID,
            "type": "subscribe_events",
            "event_type": "state_changed",
        });
        ws.send(Message::text(subscribe.to_string()))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        loop {
            let text = next_text(&mut ws).await?;
            if let Ok(WsMessage::Result { id, success, error }) =
                serde_json::from_str::<WsMessage>(&text)
            {
                if id != SUBSCRIBE_ID {
                    continue;
                }
                if !success {
                    return Err(Error::WebSocketConnect(format!(
                        "subscription rejected: {}",
                        error.unwrap_or_default()
                    )));
                }
                break;
            }
        }

        tracing::info!(version = ?hub_version, "Push channel connected");

        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (pong_tx, last_pong) = watch::channel(0u64);
        let alive = Arc::new(AtomicBool::new(true));

        let (mut write, mut read) = ws.split();

        let task_alive = Arc::clone(&alive);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Some(msg) = outbound_rx.recv() => {
                        if let Err(e) = write.send(msg).await {
                            tracing::warn!(error = %e, "Push channel write failed");
                            break;
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                handle_frame(&text, &event_tx, &pong_tx);
                            }
                            Some(Ok(Message::Close(frame))) => {
                                if let Some(ref cf) = frame {
                                    tracing::info!(
                                        code = %cf.code,
                                        reason = %cf.reason,
                                        "Push channel close frame received"
                                    );
                                } else {
                                    tracing::info!("Push channel close frame received (no payload)");
                                }
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "Push channel read error");
                                break;
                            }
                            None => {
                                tracing::info!("Push channel stream ended");
                                break;
                            }
                            // Ping/Pong/Binary -- tungstenite answers pings itself
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
            task_alive.store(false, Ordering::SeqCst);
            tracing::debug!("Push channel reader exiting");
        });

        Ok(Self {
            event_rx,
            outbound,
            alive,
            next_id: AtomicU64::new(SUBSCRIBE_ID + 1),
            last_pong,
            hub_version,
            cancel,
        })
    }

    /// Get a new broadcast receiver for state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StateChange>> {
        self.event_rx.resubscribe()
    }

    /// `false` once the socket has dropped or the channel was shut down.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Hub version reported during authentication.
    pub fn hub_version(&self) -> Option<&str> {
        self.hub_version.as_deref()
    }

    /// Send a protocol-level ping and wait for the matching pong.
    ///
    /// Callers bound the wait with their own timeout.
    pub async fn ping(&self) -> Result<(), Error> {
        if !self.is_alive() {
            return Err(Error::WebSocketClosed {
                code: 1006,
                reason: "push channel is not alive".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::json!({ "id": id, "type": "ping" });
        self.outbound
            .send(Message::text(frame.to_string()))
            .map_err(|_| Error::WebSocketClosed {
                code: 1006,
                reason: "writer task stopped".into(),
            })?;

        let mut rx = self.last_pong.clone();
        rx.wait_for(|last| *last >= id)
            .await
            .map(|_| ())
            .map_err(|_| Error::WebSocketClosed {
                code: 1006,
                reason: "reader task stopped".into(),
            })
    }

    /// Signal the background task to close the socket.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Frame handling ───────────────────────────────────────────────────

async fn next_text<S>(ws: &mut S) -> Result<String, Error>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame.map_or((1000, String::new()), |cf| {
                    (u16::from(cf.code), cf.reason.as_str().to_owned())
                });
                return Err(Error::WebSocketClosed { code, reason });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => {
                return Err(Error::WebSocketClosed {
                    code: 1006,
                    reason: "stream ended during handshake".into(),
                });
            }
        }
    }
}

/// Parse a text frame, broadcasting state changes and recording pongs.
fn handle_frame(
    text: &str,
    event_tx: &broadcast::Sender<Arc<StateChange>>,
    pong_tx: &watch::Sender<u64>,
) {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse push frame");
            return;
        }
    };

    match msg {
        WsMessage::Event { event } => {
            if event
                .event_type
                .as_deref()
                .is_some_and(|t| t != "state_changed")
            {
                return;
            }
            let change = StateChange {
                entity_id: event.data.entity_id,
                new_state: event.data.new_state,
            };
            // Ignore send errors -- just means no active subscribers right now
            let _ = event_tx.send(Arc::new(change));
        }
        WsMessage::Pong { id } => {
            pong_tx.send_modify(|last| *last = (*last).max(id));
        }
        WsMessage::Result {
            success: false,
            error,
            id,
        } => {
            tracing::warn!(id, error = ?error, "Push channel request failed");
        }
        _ => {}
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn channels() -> (
        broadcast::Sender<Arc<StateChange>>,
        broadcast::Receiver<Arc<StateChange>>,
        watch::Sender<u64>,
    ) {
        let (tx, rx) = broadcast::channel(16);
        let (pong_tx, _) = watch::channel(0);
        (tx, rx, pong_tx)
    }

    #[test]
    fn url_for_maps_schemes() {
        let ws = PushChannel::url_for(&Url::parse("http://hub.local:8123").unwrap()).unwrap();
        assert_eq!(ws.as_str(), "ws://hub.local:8123/api/websocket");

        let wss = PushChannel::url_for(&Url::parse("https://hub.example.com/").unwrap()).unwrap();
        assert_eq!(wss.as_str(), "wss://hub.example.com/api/websocket");

        assert!(PushChannel::url_for(&Url::parse("ftp://hub.local").unwrap()).is_err());
    }

    #[test]
    fn state_changed_event_is_broadcast() {
        let (tx, mut rx, pong_tx) = channels();

        let raw = serde_json::json!({
            "id": 1,
            "type": "event",
            "event": {
                "event_type": "state_changed",
                "data": {
                    "entity_id": "light.door",
                    "old_state": null,
                    "new_state": {
                        "entity_id": "light.door",
                        "state": "on",
                        "attributes": { "brightness": 128 },
                        "context": { "id": "abc" }
                    }
                }
            }
        });

        handle_frame(&raw.to_string(), &tx, &pong_tx);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.entity_id, "light.door");
        let state = change.new_state.as_ref().unwrap();
        assert_eq!(state.state, "on");
        assert_eq!(state.attr_f64("brightness"), Some(128.0));
    }

    #[test]
    fn removed_entity_has_no_new_state() {
        let (tx, mut rx, pong_tx) = channels();
        let raw = serde_json::json!({
            "id": 1,
            "type": "event",
            "event": {
                "event_type": "state_changed",
                "data": { "entity_id": "sensor.gone", "new_state": null }
            }
        });

        handle_frame(&raw.to_string(), &tx, &pong_tx);
        assert!(rx.try_recv().unwrap().new_state.is_none());
    }

    #[test]
    fn pong_advances_watermark() {
        let (tx, _rx, pong_tx) = channels();
        let pong_rx = pong_tx.subscribe();

        handle_frame(r#"{"id": 7, "type": "pong"}"#, &tx, &pong_tx);
        assert_eq!(*pong_rx.borrow(), 7);

        // Late pongs never move the watermark backwards.
        handle_frame(r#"{"id": 3, "type": "pong"}"#, &tx, &pong_tx);
        assert_eq!(*pong_rx.borrow(), 7);
    }

    #[test]
    fn unknown_and_malformed_frames_are_ignored() {
        let (tx, mut rx, pong_tx) = channels();

        handle_frame(r#"{"type": "something_new", "id": 4}"#, &tx, &pong_tx);
        handle_frame("not json at all", &tx, &pong_tx);

        assert!(rx.try_recv().is_err());
    }
}
