// hubdeck-api: Async Rust client for a home-automation hub (REST + push channel)

pub mod client;
pub mod error;
pub mod models;
pub mod transport;
pub mod websocket;

pub use client::{HubClient, entity_domain};
pub use error::Error;
pub use models::{ConnectionTest, HubEntityState, StateChange};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::PushChannel;
