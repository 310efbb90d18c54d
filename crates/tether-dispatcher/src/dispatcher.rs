//! Local dispatcher
//!
//! Listens on the session's aggregate topic and serves every INVOKE:
//! 1. PING the sender's worker topic (blocking sessions only)
//! 2. run the invocation through the [`InvocationPipeline`]
//! 3. publish SUCCESS or ERROR back (blocking sessions only)
//!
//! Mirror sessions run at most one invocation per function at a time. A
//! function is released when its invocation completes or once the mirror
//! interval has passed, whichever comes first. Each claim carries its own
//! generation so a stale expiry never releases a newer claim.

use crate::error::DispatchError;
use crate::pipeline::InvocationPipeline;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tether_core::telemetry::preview;
use tether_core::{DebuggerSession, FunctionId};
use tether_transport::{BrokerAccess, Connection, Envelope, InvokeRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Log previews are cut to this many characters unless verbose
pub const PREVIEW_CHARS: usize = 100;

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// INVOKE messages received
    pub received: usize,
    /// Invocations that returned a result
    pub completed: usize,
    /// Invocations that failed
    pub failed: usize,
    /// Mirrored invocations skipped because the function was busy
    pub suppressed: usize,
}

/// Serves forwarded invocations for one session
pub struct Dispatcher {
    session: DebuggerSession,
    pipeline: Arc<dyn InvocationPipeline>,
    verbose: bool,
    processing: Arc<DashMap<FunctionId, u64>>,
    generation: AtomicU64,
    stats: Mutex<DispatchStats>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("session_id", &self.session.session_id)
            .field("mirror", &self.session.mirror)
            .field("processing", &self.processing.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher for `session` running invocations through `pipeline`
    #[must_use]
    pub fn new(session: DebuggerSession, pipeline: Arc<dyn InvocationPipeline>) -> Self {
        Self {
            session,
            pipeline,
            verbose: false,
            processing: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    /// With full request/response logging
    #[inline]
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Subscribe to the aggregate topic and serve invocations until closed
    ///
    /// # Errors
    /// - any error of [`Connection::connect`]
    pub async fn connect(self: &Arc<Self>, access: &BrokerAccess) -> Result<DispatcherHandle, DispatchError> {
        let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
        let connection = Connection::connect(
            access
                .options()
                .with_topic(self.session.session_id.events_topic())
                .with_inbox(inbox_tx),
        )
        .await?;

        let dispatcher = Arc::clone(self);
        let link = connection.clone();
        let task = tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                let dispatcher = Arc::clone(&dispatcher);
                let link = link.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.dispatch(&link, envelope).await {
                        tracing::error!(error = %e, "Dispatch failed");
                    }
                });
            }
            tracing::debug!("Dispatcher inbox closed");
        });

        tracing::info!(session_id = %self.session.session_id, mirror = self.session.mirror, "Dispatcher listening");
        Ok(DispatcherHandle { connection, task })
    }

    /// Serve one message from the aggregate topic
    ///
    /// # Errors
    /// - `DispatchError::UnexpectedEnvelope` for anything but INVOKE
    /// - `DispatchError::Transport` if the PING or the reply cannot be published
    pub async fn dispatch(&self, link: &Connection, envelope: Envelope) -> Result<(), DispatchError> {
        let request = match envelope {
            Envelope::Invoke(request) => request,
            other => {
                tracing::warn!(kind = %other.kind(), request_id = %other.routing().request_id, "Ignoring unexpected message");
                return Err(DispatchError::UnexpectedEnvelope(other.kind()));
            }
        };
        self.stats.lock().received += 1;

        let routing = request.routing.clone();
        let reply_topic = self.session.session_id.worker_topic(&routing.worker_id);

        let claim = if self.session.mirror {
            let Some(generation) = self.claim(&routing.function_id) else {
                tracing::debug!(function_id = %routing.function_id, "Function already processing, mirrored invocation skipped");
                self.stats.lock().suppressed += 1;
                return Ok(());
            };
            Some(generation)
        } else {
            link.publish(&Envelope::ping(routing.clone()), &reply_topic).await?;
            None
        };

        self.log_request(&request);
        let result = self.pipeline.run(request).await;
        if let Some(generation) = claim {
            release(&self.processing, &routing.function_id, generation);
        }

        let reply = match result {
            Ok(body) => {
                self.log_response(&routing.function_id, &body);
                self.stats.lock().completed += 1;
                Envelope::success(routing, body)
            }
            Err(e) => {
                tracing::error!(function_id = %routing.function_id, request_id = %routing.request_id, error = %e, "Invocation failed");
                self.stats.lock().failed += 1;
                Envelope::failure(routing, e.into_failure())
            }
        };

        if self.session.mirror {
            return Ok(());
        }
        link.publish(&reply, &reply_topic).await?;
        Ok(())
    }

    /// Mark a function as processing; `None` if it already is
    fn claim(&self, function_id: &FunctionId) -> Option<u64> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        match self.processing.entry(function_id.clone()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(generation);
            }
        }

        let interval = self.session.mirror_interval;
        if !interval.is_zero() {
            let processing = Arc::clone(&self.processing);
            let function_id = function_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                release(&processing, &function_id, generation);
            });
        }
        Some(generation)
    }

    fn log_request(&self, request: &InvokeRequest) {
        let function_id = &request.routing.function_id;
        if self.verbose {
            let pretty = serde_json::to_string_pretty(&request.event).unwrap_or_default();
            tracing::debug!(%function_id, request_id = %request.routing.request_id, "Request:\n{pretty}");
        } else {
            tracing::info!(%function_id, "Request: {}", preview(&request.event, PREVIEW_CHARS));
        }
    }

    fn log_response(&self, function_id: &FunctionId, body: &Value) {
        if self.verbose {
            let pretty = serde_json::to_string_pretty(body).unwrap_or_default();
            tracing::debug!(%function_id, "Response:\n{pretty}");
        } else {
            tracing::info!(%function_id, "Response: {}", preview(body, PREVIEW_CHARS));
        }
    }

    /// Functions with a mirrored invocation in progress
    #[must_use]
    pub fn processing_count(&self) -> usize {
        self.processing.len()
    }

    /// Dispatcher statistics
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock()
    }
}

/// Drop the claim on `function_id` if it is still the one numbered `generation`
fn release(processing: &DashMap<FunctionId, u64>, function_id: &FunctionId, generation: u64) {
    processing.remove_if(function_id, |_, current| *current == generation);
}

/// Running dispatcher subscription
#[derive(Debug)]
pub struct DispatcherHandle {
    connection: Connection,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Broker connection used for replies
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Stop listening and close the broker session
    ///
    /// # Errors
    /// - any error of [`Connection::close`]
    pub async fn close(self) -> Result<(), DispatchError> {
        self.task.abort();
        self.connection.close().await?;
        Ok(())
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
