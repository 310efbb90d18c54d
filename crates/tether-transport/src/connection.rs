//! Broker connection with chunked publish and reassembling receive
//!
//! `Connection::connect` resolves credentials and the broker endpoint, opens
//! a session and spawns an event loop that:
//! - re-subscribes to the configured topic on every handshake
//! - feeds inbound messages through a [`Reassembler`] into the inbox
//! - flips the connected rendezvous that gates `publish`
//!
//! A publish issued before the first handshake waits for it and is never
//! dropped. Fragments of one publish go out in order, each awaiting its
//! broker acknowledgment.

use crate::broker::{
    BrokerClient, BrokerConnector, BrokerEvent, CredentialProvider, EndpointResolver,
};
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::fragment::split_envelope;
use crate::reassembly::Reassembler;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Link state observed by publishers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting for the first handshake
    Connecting,
    /// Handshake done; publishes proceed
    Connected,
    /// Session ended
    Closed,
}

/// Everything needed to reach the broker
#[derive(Clone)]
pub struct BrokerAccess {
    pub connector: Arc<dyn BrokerConnector>,
    pub resolver: Arc<dyn EndpointResolver>,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for BrokerAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerAccess").finish_non_exhaustive()
    }
}

impl BrokerAccess {
    /// Access through `connector` and `resolver`, signing with `credentials`
    #[must_use]
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        resolver: Arc<dyn EndpointResolver>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            connector,
            resolver,
            credentials,
        }
    }

    /// Fresh connect options
    #[must_use]
    pub fn options(&self) -> ConnectOptions {
        ConnectOptions::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.resolver),
            Arc::clone(&self.credentials),
        )
    }
}

/// Options for [`Connection::connect`]
pub struct ConnectOptions {
    connector: Arc<dyn BrokerConnector>,
    resolver: Arc<dyn EndpointResolver>,
    credentials: Arc<dyn CredentialProvider>,
    topic: Option<String>,
    inbox: Option<mpsc::UnboundedSender<Envelope>>,
    client_id: String,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("topic", &self.topic)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ConnectOptions {
    /// Options with a random client id
    #[must_use]
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        resolver: Arc<dyn EndpointResolver>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            connector,
            resolver,
            credentials,
            topic: None,
            inbox: None,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// With topic to subscribe to
    #[inline]
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// With inbox receiving reassembled envelopes
    #[inline]
    #[must_use]
    pub fn with_inbox(mut self, inbox: mpsc::UnboundedSender<Envelope>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// With client id
    #[inline]
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

struct Inner {
    client: Arc<dyn BrokerClient>,
    state: watch::Receiver<LinkState>,
    event_loop: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Handle to an open broker connection; cheap to clone
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl Connection {
    /// Connect to the broker
    ///
    /// # Errors
    /// - `TransportError::Credentials` if credentials cannot be resolved
    /// - `TransportError::EndpointNotFound` if the endpoint lookup is empty
    /// - any error of [`BrokerConnector::open`]
    pub async fn connect(options: ConnectOptions) -> Result<Self, TransportError> {
        let credentials = options.credentials.credentials().await?;
        let endpoint = options
            .resolver
            .resolve_endpoint(&credentials)
            .await?
            .ok_or(TransportError::EndpointNotFound)?;

        tracing::debug!(%endpoint, client_id = %options.client_id, "Opening broker session");
        let session = options
            .connector
            .open(&endpoint, &credentials, &options.client_id)
            .await?;

        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let event_loop = tokio::spawn(run_event_loop(
            Arc::clone(&session.client),
            session.events,
            options.topic,
            options.inbox,
            state_tx,
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                client: session.client,
                state: state_rx,
                event_loop,
            }),
        })
    }

    /// Current link state
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Wait until the first handshake completed
    ///
    /// # Errors
    /// - `TransportError::Closed` if the session ended first
    pub async fn connected(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.clone();
        let settled = *state
            .wait_for(|s| *s != LinkState::Connecting)
            .await
            .map_err(|_| TransportError::Closed)?;
        match settled {
            LinkState::Connected => Ok(()),
            LinkState::Connecting | LinkState::Closed => Err(TransportError::Closed),
        }
    }

    /// Publish an envelope as one or more acknowledged fragments
    ///
    /// # Errors
    /// - `TransportError::Closed` if the session ended before or during the publish
    /// - `TransportError::Broker` if the broker rejects a fragment
    pub async fn publish(&self, envelope: &Envelope, topic: &str) -> Result<(), TransportError> {
        self.connected().await?;

        let fragments = split_envelope(envelope)?;
        tracing::trace!(
            topic,
            kind = %envelope.kind(),
            fragments = fragments.len(),
            "Publishing envelope"
        );
        for fragment in fragments {
            self.inner.client.publish(topic, fragment.encode()?).await?;
        }
        Ok(())
    }

    /// End the session
    ///
    /// # Errors
    /// - any error of [`BrokerClient::disconnect`]
    pub async fn close(&self) -> Result<(), TransportError> {
        self.inner.client.disconnect().await
    }
}

async fn run_event_loop(
    client: Arc<dyn BrokerClient>,
    mut events: mpsc::UnboundedReceiver<BrokerEvent>,
    topic: Option<String>,
    inbox: Option<mpsc::UnboundedSender<Envelope>>,
    state: watch::Sender<LinkState>,
) {
    let mut reassembler = Reassembler::new();

    while let Some(event) = events.recv().await {
        match event {
            BrokerEvent::Connected => {
                if let Some(topic) = &topic {
                    if let Err(e) = client.subscribe(topic).await {
                        tracing::error!(topic, error = %e, "Subscribe failed");
                    }
                }
                tracing::debug!("Broker connected");
                state.send_replace(LinkState::Connected);
            }
            BrokerEvent::Message { topic, payload } => {
                match reassembler.accept_bytes(&payload) {
                    Ok(Some(envelope)) => {
                        if let Some(inbox) = &inbox {
                            if inbox.send(envelope).is_err() {
                                tracing::debug!("Inbox closed, dropping envelope");
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(topic, error = %e, "Rejected message from broken peer");
                    }
                }
            }
            BrokerEvent::Reconnecting => tracing::info!("Broker link lost, reconnecting"),
            BrokerEvent::Error(message) => tracing::error!(%message, "Broker client error"),
            BrokerEvent::Closed => break,
        }
    }

    tracing::debug!("Broker session closed");
    state.send_replace(LinkState::Closed);
}
