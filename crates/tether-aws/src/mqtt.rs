//! MQTT broker client
//!
//! Sessions run MQTT 3.1.1 over a presigned WebSocket. One task drives the
//! event loop and turns its notifications into [`BrokerEvent`]s; after a
//! connection error it waits, re-signs the URL and lets the loop reconnect.
//!
//! Publishes use QoS 1. The event loop reports the packet id of each publish
//! as it goes out, in the order they were queued, so pending publishes wait
//! in a FIFO until their id is known and then for the matching `PUBACK`.
//! Unacknowledged publishes are replayed under their old id after a
//! reconnect and stay pending until that replay is acknowledged.

use crate::signing::presigned_url;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tether_transport::{
    BrokerClient, BrokerConnector, BrokerEvent, BrokerSession, Credentials, TransportError,
};
use tokio::sync::{mpsc, oneshot};

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Largest packet either way; fragments are well below this
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Default keep-alive interval
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default pause before reconnecting
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Lifetime of a presigned URL
const URL_LIFETIME: Duration = Duration::from_secs(3600);

type AckSender = oneshot::Sender<Result<(), TransportError>>;

/// Publishes waiting for their acknowledgement
#[derive(Default)]
struct PendingAcks {
    queued: VecDeque<AckSender>,
    in_flight: HashMap<u16, AckSender>,
}

impl PendingAcks {
    fn queue(&mut self, ack: AckSender) {
        self.queued.push_back(ack);
    }

    /// A publish went out as `pkid`: a replay, or else the oldest queued one
    fn sent(&mut self, pkid: u16) {
        if self.in_flight.contains_key(&pkid) {
            return;
        }
        if let Some(ack) = self.queued.pop_front() {
            self.in_flight.insert(pkid, ack);
        }
    }

    fn acknowledged(&mut self, pkid: u16) {
        if let Some(ack) = self.in_flight.remove(&pkid) {
            let _ = ack.send(Ok(()));
        }
    }

    fn close(&mut self) {
        for ack in self.queued.drain(..).chain(self.in_flight.drain().map(|(_, ack)| ack)) {
            let _ = ack.send(Err(TransportError::Closed));
        }
    }
}

/// Opens MQTT sessions over presigned WebSockets
#[derive(Debug, Clone)]
pub struct MqttConnector {
    region: String,
    keep_alive: Duration,
    reconnect_delay: Duration,
}

impl MqttConnector {
    /// Connector signing for `region` unless the credentials name another
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// With keep-alive interval
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// With pause before reconnecting
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn options(&self, client_id: &str, url: String) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, url, 443);
        options
            .set_transport(Transport::wss_with_default_config())
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true)
            .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options
    }
}

struct Signer {
    endpoint: String,
    region: String,
    credentials: Credentials,
}

impl Signer {
    fn url(&self) -> Result<String, TransportError> {
        presigned_url(&self.endpoint, &self.region, &self.credentials, SystemTime::now(), URL_LIFETIME)
    }
}

#[async_trait::async_trait]
impl BrokerConnector for MqttConnector {
    async fn open(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        client_id: &str,
    ) -> Result<BrokerSession, TransportError> {
        let signer = Signer {
            endpoint: endpoint.to_string(),
            region: credentials.region.clone().unwrap_or_else(|| self.region.clone()),
            credentials: credentials.clone(),
        };
        let (client, eventloop) = AsyncClient::new(self.options(client_id, signer.url()?), REQUEST_CAPACITY);

        let pending = Arc::new(Mutex::new(PendingAcks::default()));
        let closing = Arc::new(AtomicBool::new(false));
        let (events_tx, events) = mpsc::unbounded_channel();

        let driver = Driver {
            connector: self.clone(),
            client_id: client_id.to_string(),
            signer,
            pending: Arc::clone(&pending),
            closing: Arc::clone(&closing),
            events: events_tx,
        };
        tokio::spawn(driver.run(eventloop));

        tracing::debug!(endpoint, client_id, "Opening broker session");
        Ok(BrokerSession {
            client: Arc::new(MqttClient {
                client,
                pending,
                closing,
                publish_order: tokio::sync::Mutex::new(()),
            }),
            events,
        })
    }
}

struct Driver {
    connector: MqttConnector,
    client_id: String,
    signer: Signer,
    pending: Arc<Mutex<PendingAcks>>,
    closing: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<BrokerEvent>,
}

impl Driver {
    fn emit(&self, event: BrokerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    async fn run(self, mut eventloop: EventLoop) {
        loop {
            let alive = match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.emit(BrokerEvent::Connected),
                Ok(Event::Incoming(Packet::Publish(publish))) => self.emit(BrokerEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }),
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    self.pending.lock().acknowledged(ack.pkid);
                    true
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.pending.lock().sent(pkid);
                    true
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => false,
                Ok(_) => true,
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        false
                    } else {
                        self.reconnect(&mut eventloop, &e.to_string()).await
                    }
                }
            };
            if !alive {
                break;
            }
        }

        self.pending.lock().close();
        let _ = self.events.send(BrokerEvent::Closed);
        tracing::debug!(client_id = %self.client_id, "Broker session closed");
    }

    async fn reconnect(&self, eventloop: &mut EventLoop, error: &str) -> bool {
        tracing::warn!(client_id = %self.client_id, error, "Broker connection lost");
        if !self.emit(BrokerEvent::Error(error.to_string())) || !self.emit(BrokerEvent::Reconnecting) {
            return false;
        }

        tokio::time::sleep(self.connector.reconnect_delay).await;
        match self.signer.url() {
            Ok(url) => {
                eventloop.mqtt_options = self.connector.options(&self.client_id, url);
                true
            }
            Err(e) => {
                let _ = self.events.send(BrokerEvent::Error(e.to_string()));
                false
            }
        }
    }
}

struct MqttClient {
    client: AsyncClient,
    pending: Arc<Mutex<PendingAcks>>,
    closing: Arc<AtomicBool>,
    publish_order: tokio::sync::Mutex<()>,
}

fn client_error(e: rumqttc::ClientError) -> TransportError {
    TransportError::Broker(e.to_string())
}

#[async_trait::async_trait]
impl BrokerClient for MqttClient {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(client_error)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let (ack, acked) = oneshot::channel();
        {
            // queue order must match the order requests reach the event loop
            let _order = self.publish_order.lock().await;
            self.pending.lock().queue(ack);
            if let Err(e) = self.client.publish(topic, QoS::AtLeastOnce, false, payload).await {
                self.pending.lock().queued.pop_back();
                return Err(client_error(e));
            }
        }
        acked.await.map_err(|_| TransportError::Closed)?
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        self.client.disconnect().await.map_err(client_error)
    }
}
