//! Broker seams
//!
//! The transport talks to the managed pub/sub broker only through these
//! traits:
//! - [`CredentialProvider`]: resolves the identity used to connect, with
//!   [`StaticCredentials`] for fixed keys
//! - [`EndpointResolver`]: the lookup call returning the broker address
//! - [`BrokerConnector`]: opens a [`BrokerSession`] against that address
//! - [`BrokerClient`]: subscribe and acknowledged publish on an open session
//!
//! Reconnecting with backoff after a disconnect is the client's job; it
//! reports progress as [`BrokerEvent`]s.

use crate::error::TransportError;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Credentials used to sign the broker connection
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: Option<String>,
}

impl Credentials {
    /// Create long-lived credentials
    #[must_use]
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            region: None,
        }
    }

    /// With temporary session token
    #[inline]
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// With region
    #[inline]
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

/// Resolves connection credentials
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Resolve current credentials
    async fn credentials(&self) -> Result<Credentials, TransportError>;
}

/// Fixed credentials
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<Credentials, TransportError> {
        Ok(self.0.clone())
    }
}

/// Broker endpoint lookup
#[async_trait::async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Address of the account's data endpoint, `None` if the lookup came back empty
    async fn resolve_endpoint(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<String>, TransportError>;
}

/// Progress reported by an open broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Handshake completed (initially or after a reconnect)
    Connected,
    /// A message arrived on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// The link dropped; the client is retrying
    Reconnecting,
    /// The session ended for good
    Closed,
    /// A non-fatal client error
    Error(String),
}

/// Operations on an open broker session
#[async_trait::async_trait]
pub trait BrokerClient: Send + Sync {
    /// Subscribe to a topic
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish one message, resolving once the broker acknowledged it
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// End the session
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// An open session: a client plus the stream of its events
pub struct BrokerSession {
    pub client: Arc<dyn BrokerClient>,
    pub events: mpsc::UnboundedReceiver<BrokerEvent>,
}

impl std::fmt::Debug for BrokerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSession").finish_non_exhaustive()
    }
}

/// Opens broker sessions
#[async_trait::async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a session; the handshake completes asynchronously and is
    /// reported as [`BrokerEvent::Connected`]
    async fn open(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        client_id: &str,
    ) -> Result<BrokerSession, TransportError>;
}
