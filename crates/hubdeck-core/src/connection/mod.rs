// ── Connection lifecycle ──

mod backoff;
mod manager;
mod state;

pub use backoff::calculate_backoff;
pub use manager::{ActiveTransport, ConnectionManager, ListenerHandle};
pub use state::{ConnectionMode, ConnectionSnapshot, ConnectionState};
