//! Execution runtime seam
//!
//! An [`ExecutionRuntime`] starts one isolated [`ExecutionContext`] per
//! worker. Two runtimes ship with the crate:
//! - [`ThreadRuntime`]: a dedicated OS thread running handlers from a
//!   registered function table
//! - [`ProcessRuntime`]: a child process speaking JSON lines over stdio

mod process;
mod thread;

pub use process::ProcessRuntime;
pub use thread::{Handler, HandlerTable, ThreadRuntime};

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tether_core::{FunctionId, HandlerFailure, WorkerId};

/// One invocation posted to an execution context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Function being invoked
    pub function_id: FunctionId,
    /// Built artifact to load
    pub artifact: PathBuf,
    /// Exported handler name
    pub handler: String,
    /// Environment of the cloud worker for this invocation
    pub environment: BTreeMap<String, String>,
    /// Event payload
    pub event: Value,
    /// Serialisable platform context
    pub context: Value,
}

/// Parameters for starting a context
#[derive(Debug, Clone, PartialEq)]
pub struct StartSpec {
    /// Worker the context belongs to
    pub worker_id: WorkerId,
    /// Function that first used the worker
    pub function_id: FunctionId,
    /// Base environment: first invocation's environment plus local markers
    pub environment: BTreeMap<String, String>,
}

/// Starts execution contexts
#[async_trait::async_trait]
pub trait ExecutionRuntime: Send + Sync {
    /// Start an isolated context
    async fn start(&self, spec: StartSpec) -> Result<Box<dyn ExecutionContext>, SandboxError>;
}

/// One running, reusable execution context
#[async_trait::async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Run one invocation to completion
    ///
    /// A crash of the context is reported as a failure, never as a hang.
    async fn invoke(&mut self, request: ExecutionRequest) -> Result<Value, HandlerFailure>;

    /// Whether the context can take further invocations
    fn is_alive(&self) -> bool;

    /// Tear the context down
    async fn terminate(&mut self);
}

/// Failure reported when a context dies mid-invocation
#[must_use]
pub fn crashed(detail: impl std::fmt::Display) -> HandlerFailure {
    HandlerFailure::new("SandboxCrashed", format!("execution context crashed: {detail}"))
}
