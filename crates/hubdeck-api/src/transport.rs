// Shared transport configuration for building reqwest::Client instances.
//
// The REST client and the connection probe share TLS and timeout
// settings through this module, avoiding duplicated builder logic.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the bundled webpki roots.
    #[default]
    System,
    /// Accept any certificate (self-signed hubs on the LAN).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` that sends the bearer token on every request.
    pub fn build_client(&self, token: &SecretString) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| Error::Tls(format!("invalid access token header: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("hubdeck/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        if matches!(self.tls, TlsMode::DangerAcceptInvalid) {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
