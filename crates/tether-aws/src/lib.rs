//! Tether AWS - production adapters for the live-invocation bridge
//!
//! Provides:
//! - [`AwsSettings`] / [`AwsServices`]: region, profile and role resolved
//!   once into an SDK configuration
//! - [`SdkCredentials`]: broker credentials from the SDK provider chain
//! - [`IotEndpointResolver`]: the account's data endpoint
//! - [`MqttConnector`]: MQTT over a presigned WebSocket ([`presigned_url`])
//! - [`AwsCloud`]: the reconciler's management API
//! - [`serve`]: the entry point of a function compiled with its handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_aws::prelude::*;
//!
//! let services = AwsServices::load(&AwsSettings::from_config(&config)).await?;
//! let parts = SessionParts {
//!     cloud: Arc::new(services.cloud()),
//!     broker: services.broker_access()?,
//!     ..
//! };
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cloud;
pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod entry;
pub mod error;
pub mod mqtt;
pub mod signing;

pub use cloud::AwsCloud;
pub use config::{AwsServices, AwsSettings, ROLE_SESSION_NAME};
pub use credentials::SdkCredentials;
pub use endpoint::{IotEndpointResolver, DATA_ENDPOINT_TYPE};
pub use entry::serve;
pub use error::AwsError;
pub use mqtt::MqttConnector;
pub use signing::{presigned_url, SIGNING_NAME};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring the production adapters
    pub use crate::{serve, AwsCloud, AwsError, AwsServices, AwsSettings, MqttConnector};
}
