// ── Transport construction ──

use std::sync::Arc;

use async_trait::async_trait;
use hubdeck_api::{HubClient, PushChannel, TransportConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{PollTransport, PushTransport, Transport, UpdateBus};
use crate::config::HubConfig;
use crate::error::CoreError;

/// Opens transports for the connection manager.
///
/// A seam so the manager's state machine can be driven without a hub.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open_push(
        &self,
        config: &HubConfig,
        bus: UpdateBus,
    ) -> Result<Arc<dyn Transport>, CoreError>;

    async fn open_poll(
        &self,
        config: &HubConfig,
        bus: UpdateBus,
    ) -> Result<Arc<dyn Transport>, CoreError>;
}

/// Opens real hub transports over `hubdeck-api`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HubTransportFactory;

impl HubTransportFactory {
    fn client(config: &HubConfig) -> Result<HubClient, CoreError> {
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.tuning.command_timeout,
        };
        Ok(HubClient::new(
            config.url.clone(),
            &config.access_token,
            &transport,
        )?)
    }
}

#[async_trait]
impl TransportFactory for HubTransportFactory {
    async fn open_push(
        &self,
        config: &HubConfig,
        bus: UpdateBus,
    ) -> Result<Arc<dyn Transport>, CoreError> {
        let client = Self::client(config)?;
        let ws_url = PushChannel::url_for(&config.url)?;
        let channel =
            PushChannel::connect(ws_url, &config.access_token, CancellationToken::new()).await?;
        info!(version = ?channel.hub_version(), "Push transport ready");
        Ok(Arc::new(PushTransport::start(client, channel, bus)))
    }

    async fn open_poll(
        &self,
        config: &HubConfig,
        bus: UpdateBus,
    ) -> Result<Arc<dyn Transport>, CoreError> {
        let client = Self::client(config)?;
        // Prove the hub answers and accepts the token before declaring success
        client.ping().await?;
        debug!(url = %config.url, "Poll transport ready");
        Ok(Arc::new(PollTransport::new(client, bus)))
    }
}
