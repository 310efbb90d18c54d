//! Error types for the transport
//!
//! Broker-level disconnects are the client's business (it reconnects with
//! backoff); what surfaces here are protocol violations and failed calls.

/// Transport error type
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A fragment violates the wire format; the peer is broken
    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    /// Envelope could not be encoded or decoded
    #[error("envelope serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker endpoint lookup returned nothing
    #[error("broker endpoint address not found")]
    EndpointNotFound,

    /// Credentials could not be resolved
    #[error("credential resolution failed: {0}")]
    Credentials(String),

    /// The broker rejected or failed an operation
    #[error("broker error: {0}")]
    Broker(String),

    /// The connection is gone
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether the error indicates a misbehaving peer
    #[inline]
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::InvalidFragment(_) | Self::Serialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violation_classification() {
        assert!(TransportError::InvalidFragment("no id".into()).is_protocol_violation());
        assert!(!TransportError::Closed.is_protocol_violation());
        assert!(!TransportError::Broker("throttled".into()).is_protocol_violation());
    }
}
