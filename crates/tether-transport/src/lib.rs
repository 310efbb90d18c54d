//! Tether Transport - chunked pub/sub link between cloud and developer machine
//!
//! Provides:
//! - The protocol [`Envelope`] (INVOKE, SUCCESS, ERROR, PING)
//! - Fragmenting of serialized envelopes into broker-sized [`Fragment`]s
//! - A [`Reassembler`] that rebuilds envelopes exactly once per fragment set
//! - Broker seams ([`BrokerConnector`], [`BrokerClient`], [`EndpointResolver`],
//!   [`CredentialProvider`]) and a [`Connection`] built on them
//! - An in-process [`MemoryBroker`]
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_transport::prelude::*;
//!
//! let broker = MemoryBroker::new();
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let connection = Connection::connect(
//!     ConnectOptions::new(Arc::new(broker.clone()), Arc::new(broker), credentials)
//!         .with_topic(session.events_topic())
//!         .with_inbox(tx),
//! )
//! .await?;
//! connection.publish(&envelope, &session.worker_topic(&worker)).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod broker;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod fragment;
pub mod memory;
pub mod reassembly;

pub use broker::{
    BrokerClient, BrokerConnector, BrokerEvent, BrokerSession, CredentialProvider, Credentials,
    EndpointResolver, StaticCredentials,
};
pub use connection::{BrokerAccess, ConnectOptions, Connection, LinkState};
pub use envelope::{Envelope, EnvelopeKind, InvokeFailure, InvokeRequest, InvokeSuccess, Routing};
pub use error::TransportError;
pub use fragment::{split_envelope, split_json, Fragment, FRAGMENT_SIZE};
pub use memory::MemoryBroker;
pub use reassembly::Reassembler;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the transport
    pub use crate::{
        BrokerAccess, ConnectOptions, Connection, Envelope, EnvelopeKind, InvokeRequest,
        MemoryBroker, Routing, TransportError,
    };
}
