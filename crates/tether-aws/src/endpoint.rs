//! Broker data endpoint lookup

use aws_config::SdkConfig;
use aws_sdk_iot::error::DisplayErrorContext;
use tether_transport::{Credentials, EndpointResolver, TransportError};

/// Endpoint type of the account's signed data endpoint
pub const DATA_ENDPOINT_TYPE: &str = "iot:Data-ATS";

/// Resolves the broker address through the IoT control plane
#[derive(Debug, Clone)]
pub struct IotEndpointResolver {
    client: aws_sdk_iot::Client,
}

impl IotEndpointResolver {
    /// Resolver using `config`
    #[must_use]
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_iot::Client::new(config),
        }
    }
}

#[async_trait::async_trait]
impl EndpointResolver for IotEndpointResolver {
    async fn resolve_endpoint(&self, _credentials: &Credentials) -> Result<Option<String>, TransportError> {
        let output = self
            .client
            .describe_endpoint()
            .endpoint_type(DATA_ENDPOINT_TYPE)
            .send()
            .await
            .map_err(|e| TransportError::Broker(format!("endpoint lookup failed: {}", DisplayErrorContext(&e))))?;

        let address = output.endpoint_address().filter(|a| !a.is_empty()).map(str::to_string);
        tracing::debug!(?address, "Resolved broker endpoint");
        Ok(address)
    }
}
