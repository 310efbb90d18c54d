//! Local execution pipeline
//!
//! [`LocalPipeline`] serves an INVOKE in two steps: the build engine produces
//! the artifact, then the worker's sandbox runs the configured handler.

use crate::error::DispatchError;
use serde_json::Value;
use std::sync::Arc;
use tether_build::BuildEngine;
use tether_core::FunctionCatalog;
use tether_sandbox::{ExecutionRequest, SandboxPool};
use tether_transport::InvokeRequest;

/// Runs a forwarded invocation on this machine
#[async_trait::async_trait]
pub trait InvocationPipeline: Send + Sync {
    /// Run the invocation and return the handler's result
    async fn run(&self, request: InvokeRequest) -> Result<Value, DispatchError>;
}

/// Build engine followed by sandbox pool
#[derive(Debug, Clone)]
pub struct LocalPipeline {
    catalog: FunctionCatalog,
    build: Arc<BuildEngine>,
    sandboxes: Arc<SandboxPool>,
}

impl LocalPipeline {
    /// Pipeline over shared build engine and sandbox pool
    #[must_use]
    pub fn new(catalog: FunctionCatalog, build: Arc<BuildEngine>, sandboxes: Arc<SandboxPool>) -> Self {
        Self {
            catalog,
            build,
            sandboxes,
        }
    }

    /// Build engine
    #[inline]
    #[must_use]
    pub fn build(&self) -> &Arc<BuildEngine> {
        &self.build
    }

    /// Sandbox pool
    #[inline]
    #[must_use]
    pub fn sandboxes(&self) -> &Arc<SandboxPool> {
        &self.sandboxes
    }
}

#[async_trait::async_trait]
impl InvocationPipeline for LocalPipeline {
    async fn run(&self, request: InvokeRequest) -> Result<Value, DispatchError> {
        let function_id = request.routing.function_id;
        let descriptor = self.catalog.get(&function_id)?;
        let artifact = self.build.get_artifact(&function_id).await?;

        let execution = ExecutionRequest {
            handler: descriptor.handler().to_string(),
            function_id,
            artifact,
            environment: request.environment,
            event: request.event,
            context: request.context,
        };
        Ok(self.sandboxes.invoke(&request.routing.worker_id, execution).await?)
    }
}
