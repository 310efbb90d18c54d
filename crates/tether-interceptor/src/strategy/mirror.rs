//! Mirror strategy
//!
//! The real handler always serves the invocation. A copy of the INVOKE is
//! published in the background, at most once per throttle interval. The
//! broker connection is opened on the first mirrored publish so a broker
//! outage never reaches the real handler.

use super::{InvocationStrategy, PlatformInvocation};
use crate::config::InterceptorConfig;
use crate::error::InterceptorError;
use crate::handler::RealHandler;
use crate::throttle::MirrorThrottle;
use serde_json::Value;
use std::sync::Arc;
use tether_core::{FunctionId, WorkerId};
use tether_transport::{BrokerAccess, Connection, Envelope, TransportError};
use tokio::sync::OnceCell;

struct MirrorLink {
    access: BrokerAccess,
    connection: OnceCell<Connection>,
    topic: String,
}

impl MirrorLink {
    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let connection = self
            .connection
            .get_or_try_init(|| Connection::connect(self.access.options()))
            .await?;
        connection.publish(envelope, &self.topic).await
    }
}

/// Run locally, publish a throttled copy
pub struct MirrorStrategy {
    link: Arc<MirrorLink>,
    worker_id: WorkerId,
    function_id: FunctionId,
    throttle: MirrorThrottle,
    handler: Arc<dyn RealHandler>,
}

impl std::fmt::Debug for MirrorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorStrategy")
            .field("worker_id", &self.worker_id)
            .field("function_id", &self.function_id)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

impl MirrorStrategy {
    /// Mirror strategy delegating to `handler`
    #[must_use]
    pub fn new(
        access: BrokerAccess,
        config: &InterceptorConfig,
        worker_id: WorkerId,
        handler: Arc<dyn RealHandler>,
    ) -> Self {
        Self {
            link: Arc::new(MirrorLink {
                access,
                connection: OnceCell::new(),
                topic: config.session_id.events_topic(),
            }),
            worker_id,
            function_id: config.function_id.clone(),
            throttle: MirrorThrottle::new(config.mirror_interval),
            handler,
        }
    }
}

#[async_trait::async_trait]
impl InvocationStrategy for MirrorStrategy {
    async fn handle(&self, invocation: PlatformInvocation) -> Result<Value, InterceptorError> {
        if self.throttle.try_acquire() {
            let envelope = invocation.to_envelope(&self.worker_id, &self.function_id);
            let link = Arc::clone(&self.link);
            let request_id = invocation.request_id.clone();
            tokio::spawn(async move {
                match link.publish(&envelope).await {
                    Ok(()) => tracing::debug!(%request_id, "Mirrored invocation published"),
                    Err(e) => tracing::warn!(%request_id, error = %e, "Mirrored publish failed"),
                }
            });
        } else {
            tracing::debug!(request_id = %invocation.request_id, "Mirrored publish skipped by throttle");
        }

        self.handler
            .call(invocation.event, invocation.context)
            .await
            .map_err(InterceptorError::Handler)
    }

    fn name(&self) -> &'static str {
        "mirror"
    }
}
