//! Tether Dispatcher - the developer-machine half of the live-invocation bridge
//!
//! Provides:
//! - [`Dispatcher`]: serves INVOKE messages from the session's events topic,
//!   acknowledging with PING and replying with SUCCESS or ERROR
//! - The [`InvocationPipeline`] seam and [`LocalPipeline`] (build, then sandbox)
//! - In-flight suppression of overlapping mirrored invocations
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_dispatcher::prelude::*;
//!
//! let pipeline = Arc::new(LocalPipeline::new(catalog, build, sandboxes));
//! let dispatcher = Arc::new(Dispatcher::new(session, pipeline).with_verbose(config.verbose));
//! let handle = dispatcher.connect(&access).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod pipeline;

pub use dispatcher::{DispatchStats, Dispatcher, DispatcherHandle, PREVIEW_CHARS};
pub use error::DispatchError;
pub use pipeline::{InvocationPipeline, LocalPipeline};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the dispatcher
    pub use crate::{DispatchError, Dispatcher, DispatcherHandle, InvocationPipeline, LocalPipeline};
}
