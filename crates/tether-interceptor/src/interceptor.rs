//! Cloud-side entry point
//!
//! One [`Interceptor`] lives for the lifetime of an execution environment. It
//! generates the worker id at cold start and picks the strategy from the
//! function's mirror flag.

use crate::config::InterceptorConfig;
use crate::error::InterceptorError;
use crate::handler::{resolve_original_handler, HandlerRegistry};
use crate::strategy::{BlockingStrategy, InvocationStrategy, MirrorStrategy, PlatformInvocation};
use serde_json::Value;
use tether_core::{FunctionId, WorkerId};
use tether_transport::BrokerAccess;

/// Replacement entry point of an intercepted function
pub struct Interceptor {
    worker_id: WorkerId,
    function_id: FunctionId,
    strategy: Box<dyn InvocationStrategy>,
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("worker_id", &self.worker_id)
            .field("function_id", &self.function_id)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

impl Interceptor {
    /// Cold start: generate the worker id and set up the strategy
    ///
    /// # Errors
    /// - `InterceptorError::Transport` if blocking mode cannot reach the broker
    /// - `InterceptorError::HandlerNotFound` / `Wrapper` / `MissingVariable`
    ///   if mirror mode cannot locate the real handler
    pub async fn cold_start(
        config: &InterceptorConfig,
        access: &BrokerAccess,
        handlers: &HandlerRegistry,
    ) -> Result<Self, InterceptorError> {
        let worker_id = WorkerId::generate();

        let strategy: Box<dyn InvocationStrategy> = if config.mirror {
            let name = resolve_original_handler(config).await?;
            let handler = handlers.get(&name)?;
            Box::new(MirrorStrategy::new(access.clone(), config, worker_id.clone(), handler))
        } else {
            Box::new(BlockingStrategy::connect(access, config, worker_id.clone()).await?)
        };

        tracing::info!(
            function_id = %config.function_id,
            %worker_id,
            strategy = strategy.name(),
            "Interceptor started"
        );

        Ok(Self::with_strategy(worker_id, config.function_id.clone(), strategy))
    }

    /// Interceptor around an already built strategy
    #[must_use]
    pub fn with_strategy(
        worker_id: WorkerId,
        function_id: FunctionId,
        strategy: Box<dyn InvocationStrategy>,
    ) -> Self {
        Self {
            worker_id,
            function_id,
            strategy,
        }
    }

    /// Serve one invocation
    ///
    /// # Errors
    /// - `InterceptorError::Handler` when the handler failed, locally or remotely
    /// - `InterceptorError::Transport` / `ConnectionLost` when forwarding broke
    pub async fn handle(&self, invocation: PlatformInvocation) -> Result<Value, InterceptorError> {
        let request_id = invocation.request_id.clone();
        tracing::debug!(
            function_id = %self.function_id,
            worker_id = %self.worker_id,
            %request_id,
            "Intercepted invocation"
        );

        let result = self.strategy.handle(invocation).await;
        if let Err(e) = &result {
            tracing::debug!(%request_id, error = %e, "Invocation failed");
        }
        result
    }

    /// Worker id of this execution environment
    #[inline]
    #[must_use]
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Name of the active strategy
    #[inline]
    #[must_use]
    pub fn mode(&self) -> &'static str {
        self.strategy.name()
    }
}
