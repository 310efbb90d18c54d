//! Tether Interceptor - the cloud half of the live-invocation bridge
//!
//! Replaces an intercepted function's entry point. Provides:
//! - [`InterceptorConfig`]: cold-start configuration from the injected environment
//! - [`Interceptor`]: worker identity plus the selected [`InvocationStrategy`]
//! - [`BlockingStrategy`]: forward, wait for the developer machine, fall back
//!   to a degraded response after a short silence
//! - [`MirrorStrategy`] with [`MirrorThrottle`]: run the real handler and
//!   publish a rate-limited copy
//! - [`HandlerRegistry`] and wrapper-chain resolution of the original handler
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_interceptor::prelude::*;
//!
//! let config = InterceptorConfig::from_env()?;
//! let interceptor = Interceptor::cold_start(&config, &access, &handlers).await?;
//! let body = interceptor.handle(PlatformInvocation::new(request_id, event)).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod handler;
pub mod interceptor;
pub mod strategy;
pub mod throttle;

pub use config::{InterceptorConfig, DEFAULT_FALLBACK};
pub use error::InterceptorError;
pub use handler::{resolve_original_handler, HandlerRegistry, RealHandler};
pub use interceptor::Interceptor;
pub use strategy::{
    degraded_response, BlockingStrategy, InvocationStrategy, MirrorStrategy, PlatformInvocation,
    DEGRADED_MESSAGE,
};
pub use throttle::MirrorThrottle;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the interceptor
    pub use crate::{
        HandlerRegistry, Interceptor, InterceptorConfig, InterceptorError, InvocationStrategy,
        PlatformInvocation,
    };
}
