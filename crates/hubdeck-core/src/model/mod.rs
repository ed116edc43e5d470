// ── Domain model ──

pub mod command;
pub mod entity_id;
pub mod entity_state;
pub mod playback;
pub mod reading;

pub use command::HubCommand;
pub use entity_id::{Domain, EntityId};
pub use entity_state::{ChangeSource, CommandIntent, EntityState, same_value};
pub use playback::PlaybackTarget;
pub use reading::RemoteReading;
