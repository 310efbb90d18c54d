//! Tether Sandbox - isolated execution contexts for local handler runs
//!
//! Provides:
//! - [`SandboxPool`]: at most one live sandbox per cloud worker, reused
//!   across invocations, drained gracefully on [`SandboxPool::stop_all`]
//! - [`SandboxState`]: the Idle / Busy / BusyPendingKill / Terminated machine
//! - The [`ExecutionRuntime`] seam with [`ThreadRuntime`] and [`ProcessRuntime`]
//! - [`InvocationContext`]: the synthetic platform context given to handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_sandbox::prelude::*;
//!
//! let table = HandlerTable::new().with("orders.handler", |event, _ctx| async move { Ok(event) });
//! let pool = SandboxPool::new(Arc::new(ThreadRuntime::new(table)), &project_root);
//! let body = pool.invoke(&worker_id, request).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod context;
pub mod error;
pub mod pool;
pub mod runtime;
pub mod state;

pub use context::{InvocationContext, REMAINING_TIME_MILLIS};
pub use error::SandboxError;
pub use pool::{PoolStats, ReaperHandle, SandboxPool};
pub use runtime::{
    ExecutionContext, ExecutionRequest, ExecutionRuntime, Handler, HandlerTable, ProcessRuntime,
    StartSpec, ThreadRuntime,
};
pub use state::SandboxState;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the sandbox pool
    pub use crate::{
        ExecutionRequest, HandlerTable, InvocationContext, ProcessRuntime, SandboxError,
        SandboxPool, SandboxState, ThreadRuntime,
    };
}
