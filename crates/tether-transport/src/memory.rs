//! In-process broker
//!
//! Implements every broker seam against a shared in-memory hub. Used by the
//! local test suites and by embedders that run both ends of the bridge in
//! one process.
//!
//! Topics match exactly. Every published payload is also recorded per topic
//! so tests can inspect what went over the wire.

use crate::broker::{
    BrokerClient, BrokerConnector, BrokerEvent, BrokerSession, Credentials, EndpointResolver,
    StaticCredentials,
};
use crate::connection::BrokerAccess;
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::reassembly::Reassembler;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Endpoint reported by [`MemoryBroker`]
pub const MEMORY_ENDPOINT: &str = "memory://broker";

#[derive(Default)]
struct Hub {
    online: AtomicBool,
    endpoint_known: AtomicBool,
    sessions: Mutex<Vec<mpsc::UnboundedSender<BrokerEvent>>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BrokerEvent>>>>,
    published: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

/// Shared in-memory broker; clones refer to the same hub
#[derive(Clone)]
pub struct MemoryBroker {
    hub: Arc<Hub>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("online", &self.hub.online.load(Ordering::SeqCst))
            .field("sessions", &self.hub.sessions.lock().len())
            .finish()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Broker that completes handshakes immediately
    #[must_use]
    pub fn new() -> Self {
        let broker = Self::offline();
        broker.hub.online.store(true, Ordering::SeqCst);
        broker
    }

    /// Broker that holds handshakes until [`MemoryBroker::go_online`]
    #[must_use]
    pub fn offline() -> Self {
        let hub = Hub::default();
        hub.endpoint_known.store(true, Ordering::SeqCst);
        Self { hub: Arc::new(hub) }
    }

    /// Make the endpoint lookup come back empty
    #[must_use]
    pub fn without_endpoint(self) -> Self {
        self.hub.endpoint_known.store(false, Ordering::SeqCst);
        self
    }

    /// Access bundle with fixed test credentials
    #[must_use]
    pub fn access(&self) -> BrokerAccess {
        BrokerAccess::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(StaticCredentials(Credentials::new("memory", "memory"))),
        )
    }

    /// Complete the handshake of every open session
    pub fn go_online(&self) {
        self.hub.online.store(true, Ordering::SeqCst);
        self.broadcast(&BrokerEvent::Connected);
    }

    /// Drop the link of every session; clients start reconnecting
    pub fn go_offline(&self) {
        self.hub.online.store(false, Ordering::SeqCst);
        self.broadcast(&BrokerEvent::Reconnecting);
    }

    /// Deliver a raw payload to the subscribers of a topic, bypassing the codec
    pub fn inject(&self, topic: &str, payload: Vec<u8>) {
        self.deliver(topic, payload);
    }

    /// Raw payloads published to a topic, in order
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.hub.published.lock().get(topic).cloned().unwrap_or_default()
    }

    /// Envelopes published to a topic, reassembled
    #[must_use]
    pub fn published_envelopes(&self, topic: &str) -> Vec<Envelope> {
        let mut reassembler = Reassembler::new();
        self.published(topic)
            .iter()
            .filter_map(|payload| reassembler.accept_bytes(payload).ok().flatten())
            .collect()
    }

    /// Number of subscribers on a topic
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.hub.subscribers.lock().get(topic).map_or(0, Vec::len)
    }

    fn broadcast(&self, event: &BrokerEvent) {
        self.hub
            .sessions
            .lock()
            .retain(|session| session.send(event.clone()).is_ok());
    }

    fn deliver(&self, topic: &str, payload: Vec<u8>) {
        let mut subscribers = self.hub.subscribers.lock();
        if let Some(list) = subscribers.get_mut(topic) {
            list.retain(|subscriber| {
                subscriber
                    .send(BrokerEvent::Message {
                        topic: topic.to_string(),
                        payload: payload.clone(),
                    })
                    .is_ok()
            });
        }
    }
}

struct MemoryClient {
    broker: MemoryBroker,
    events: mpsc::UnboundedSender<BrokerEvent>,
}

#[async_trait::async_trait]
impl BrokerClient for MemoryClient {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut subscribers = self.broker.hub.subscribers.lock();
        let list = subscribers.entry(topic.to_string()).or_default();
        if !list.iter().any(|s| s.same_channel(&self.events)) {
            list.push(self.events.clone());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.broker.hub.online.load(Ordering::SeqCst) {
            return Err(TransportError::Broker("broker offline".to_string()));
        }
        self.broker
            .hub
            .published
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(payload.clone());
        self.broker.deliver(topic, payload);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.broker
            .hub
            .subscribers
            .lock()
            .values_mut()
            .for_each(|list| list.retain(|s| !s.same_channel(&self.events)));
        let _ = self.events.send(BrokerEvent::Closed);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrokerConnector for MemoryBroker {
    async fn open(
        &self,
        _endpoint: &str,
        _credentials: &Credentials,
        client_id: &str,
    ) -> Result<BrokerSession, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.hub.online.load(Ordering::SeqCst) {
            let _ = tx.send(BrokerEvent::Connected);
        }
        self.hub.sessions.lock().push(tx.clone());
        tracing::trace!(client_id, "Memory broker session opened");

        Ok(BrokerSession {
            client: Arc::new(MemoryClient {
                broker: self.clone(),
                events: tx,
            }),
            events: rx,
        })
    }
}

#[async_trait::async_trait]
impl EndpointResolver for MemoryBroker {
    async fn resolve_endpoint(
        &self,
        _credentials: &Credentials,
    ) -> Result<Option<String>, TransportError> {
        Ok(self
            .hub
            .endpoint_known
            .load(Ordering::SeqCst)
            .then(|| MEMORY_ENDPOINT.to_string()))
    }
}
