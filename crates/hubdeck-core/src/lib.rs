//! State synchronization and reconciliation engine between `hubdeck-api`
//! and dashboard front ends (CLI today).
//!
//! The hub is the single source of truth; this crate keeps a locally
//! optimistic copy of device state convergent with it:
//!
//! - **[`ConnectionManager`]**: Lifecycle state machine over one active
//!   [`Transport`]: push first, then poll; heartbeat, idle health check and
//!   exponential-backoff reconnection. Transitions are observable through
//!   [`ConnectionManager::watch`] or [`ConnectionManager::subscribe`].
//!
//! - **[`EntitySyncStore`]**: One per domain. Optimistic updates, debounced
//!   outbound commands via the [`CommandDispatcher`], rollback on failure,
//!   and reconciliation of remote updates against in-flight commands
//!   (fencing tokens, grace and blocking windows).
//!
//! - **[`PollingScheduler`]**: Fallback driver that pulls state while push
//!   is unavailable and on focus regained.
//!
//! - **[`SyncSession`]**: Composition root wiring the above together from a
//!   [`HubConfig`].

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod notify;
pub mod poll;
pub mod session;
pub mod store;
pub mod stream;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{HubConfig, SyncTuning, TlsMode};
pub use connection::{
    ConnectionManager, ConnectionMode, ConnectionSnapshot, ConnectionState, ListenerHandle,
};
pub use dispatch::{CommandDispatcher, DispatchRequest};
pub use error::CoreError;
pub use model::{
    ChangeSource, CommandIntent, Domain, EntityId, EntityState, HubCommand, PlaybackTarget,
    RemoteReading,
};
pub use notify::{BroadcastSink, Notification, NotificationSink, TracingSink};
pub use poll::{FetchFn, PollingScheduler};
pub use session::SyncSession;
pub use store::{EntitySyncStore, ReconcileOutcome, StaleReason};
pub use stream::{EntityStream, Snapshot};
pub use transport::{
    EntityUpdate, HubTransportFactory, Subscription, Transport, TransportFactory, UpdateBus,
};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
