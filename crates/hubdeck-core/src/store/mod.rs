// ── Entity sync stores ──

mod entity_store;
mod record;

pub use entity_store::EntitySyncStore;
pub use record::{ReconcileOutcome, StaleReason};
