//! Tether - run deployed cloud functions on the developer machine
//!
//! Provides:
//! - [`LiveSession`]: reconcile the cloud, watch the sources, serve invocations
//! - [`SourceWatcher`]: file notification watcher that invalidates builds and
//!   sandboxes
//! - The [`DiscoverySource`] seam for refreshing the function list
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::prelude::*;
//!
//! tether_core::telemetry::init_tracing(config.verbose);
//! let session = DebuggerSession::for_current_process(&config);
//! let live = LiveSession::new(config, session, catalog, parts);
//! let running = live.start().await?;
//! tokio::signal::ctrl_c().await?;
//! running.stop().await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod session;
pub mod watcher;

pub use error::SessionError;
pub use session::{LiveSession, RunningSession, SessionParts};
pub use watcher::{watch_root, DiscoverySource, SourceWatcher, WatchFilter, WatchHandle};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running a session
    pub use crate::{DiscoverySource, LiveSession, RunningSession, SessionError, SessionParts};
    pub use tether_core::{DebuggerSession, FunctionCatalog, FunctionDescriptor, TetherConfig};
}
