//! Blocking strategy
//!
//! Forwards the invocation and races three outcomes:
//! - SUCCESS or ERROR from the developer machine settles the call
//! - a PING disarms the fallback timer but keeps the call waiting
//! - the fallback timer settles the call with [`degraded_response`]
//!
//! Responses are correlated by `(workerId, requestId)`. Whatever arrives for
//! a call that is already settled is dropped.

use super::{degraded_response, InvocationStrategy, PlatformInvocation};
use crate::config::InterceptorConfig;
use crate::error::InterceptorError;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{FunctionId, HandlerFailure, WorkerId};
use tether_transport::{BrokerAccess, Connection, Envelope};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Outcome {
    Success(Value),
    Failure(HandlerFailure),
}

struct PendingCall {
    alive: Option<oneshot::Sender<()>>,
    done: oneshot::Sender<Outcome>,
}

type PendingCalls = DashMap<String, PendingCall>;

struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.request_id);
    }
}

/// Forward and wait
pub struct BlockingStrategy {
    connection: Connection,
    worker_id: WorkerId,
    function_id: FunctionId,
    events_topic: String,
    fallback: Duration,
    pending: Arc<PendingCalls>,
    router: JoinHandle<()>,
}

impl std::fmt::Debug for BlockingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingStrategy")
            .field("worker_id", &self.worker_id)
            .field("function_id", &self.function_id)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Drop for BlockingStrategy {
    fn drop(&mut self) {
        self.router.abort();
    }
}

impl BlockingStrategy {
    /// Connect and subscribe to this worker's response topic
    ///
    /// # Errors
    /// - any error of [`Connection::connect`]
    pub async fn connect(
        access: &BrokerAccess,
        config: &InterceptorConfig,
        worker_id: WorkerId,
    ) -> Result<Self, InterceptorError> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let connection = Connection::connect(
            access
                .options()
                .with_topic(config.session_id.worker_topic(&worker_id))
                .with_inbox(inbox_tx),
        )
        .await?;

        let pending = Arc::new(PendingCalls::new());
        let router = tokio::spawn(route_responses(
            worker_id.clone(),
            inbox_rx,
            Arc::clone(&pending),
        ));

        Ok(Self {
            connection,
            worker_id,
            function_id: config.function_id.clone(),
            events_topic: config.session_id.events_topic(),
            fallback: config.fallback,
            pending,
            router,
        })
    }

    /// Calls still waiting for an answer
    #[inline]
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait::async_trait]
impl InvocationStrategy for BlockingStrategy {
    async fn handle(&self, invocation: PlatformInvocation) -> Result<Value, InterceptorError> {
        let request_id = invocation.request_id.clone();
        let envelope = invocation.to_envelope(&self.worker_id, &self.function_id);

        let (alive_tx, mut alive_rx) = oneshot::channel();
        let (done_tx, mut done_rx) = oneshot::channel();
        self.pending.insert(
            request_id.clone(),
            PendingCall {
                alive: Some(alive_tx),
                done: done_tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: &request_id,
        };

        let fallback = tokio::time::sleep(self.fallback);
        tokio::pin!(fallback);
        let publish = self.connection.publish(&envelope, &self.events_topic);
        tokio::pin!(publish);

        let mut published = false;
        let mut armed = true;
        loop {
            tokio::select! {
                result = &mut publish, if !published => {
                    published = true;
                    result?;
                    tracing::debug!(%request_id, "Invocation forwarded");
                }
                alive = &mut alive_rx, if armed => {
                    armed = false;
                    if alive.is_ok() {
                        tracing::debug!(%request_id, "Developer machine picked up the invocation");
                    }
                }
                outcome = &mut done_rx => {
                    return match outcome {
                        Ok(Outcome::Success(body)) => Ok(body),
                        Ok(Outcome::Failure(failure)) => Err(InterceptorError::Handler(failure)),
                        Err(_) => Err(InterceptorError::ConnectionLost(request_id.clone())),
                    };
                }
                () = &mut fallback, if armed => {
                    tracing::warn!(%request_id, "No answer from the developer machine, returning fallback response");
                    return Ok(degraded_response());
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "blocking"
    }
}

async fn route_responses(
    worker_id: WorkerId,
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
    pending: Arc<PendingCalls>,
) {
    while let Some(envelope) = inbox.recv().await {
        if envelope.routing().worker_id != worker_id {
            tracing::debug!(worker_id = %envelope.routing().worker_id, "Dropping message for another worker");
            continue;
        }

        match envelope {
            Envelope::Ping(routing) => {
                if let Some(mut call) = pending.get_mut(&routing.request_id) {
                    if let Some(alive) = call.alive.take() {
                        let _ = alive.send(());
                    }
                }
            }
            Envelope::Success(success) => settle(
                &pending,
                &success.routing.request_id,
                Outcome::Success(success.body),
            ),
            Envelope::Error(failure) => settle(
                &pending,
                &failure.routing.request_id,
                Outcome::Failure(failure.failure),
            ),
            Envelope::Invoke(request) => {
                tracing::warn!(request_id = %request.routing.request_id, "Unexpected INVOKE on worker topic");
            }
        }
    }

    pending.clear();
}

fn settle(pending: &PendingCalls, request_id: &str, outcome: Outcome) {
    match pending.remove(request_id) {
        Some((_, call)) => {
            let _ = call.done.send(outcome);
        }
        None => tracing::debug!(request_id, "Late response dropped"),
    }
}
