//! Tether Core - shared layer of the live-invocation bridge
//!
//! Provides what every other tether crate agrees on:
//! - Identities: [`FunctionId`], [`WorkerId`], [`SessionId`]
//! - The discovered [`FunctionDescriptor`] and its [`BundlingHints`]
//! - The [`FunctionCatalog`] registry
//! - Session configuration ([`TetherConfig`]) and identity ([`DebuggerSession`])
//! - Injected environment variable names ([`env`])
//! - Tracing initialisation ([`telemetry`])
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::prelude::*;
//!
//! let config = TetherConfig::load_or_default("tether.toml")?;
//! let session = DebuggerSession::for_current_process(&config);
//! let catalog = FunctionCatalog::from_descriptors(discovered);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod catalog;
pub mod config;
pub mod env;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod types;

pub use catalog::{FunctionCatalog, NameFilter};
pub use config::{TetherConfig, WatchConfig};
pub use error::CoreError;
pub use session::DebuggerSession;
pub use types::{
    BundlingHints, FunctionDescriptor, FunctionId, HandlerFailure, ModuleFormat, SessionId,
    WorkerId, DEFAULT_HANDLER,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with tether-core
    pub use crate::{
        BundlingHints, DebuggerSession, FunctionCatalog, FunctionDescriptor, FunctionId,
        ModuleFormat, NameFilter, SessionId, TetherConfig, WorkerId,
    };
}

/// Version of the bridge, used to match the deployed layer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
