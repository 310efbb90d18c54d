//! SDK-backed connection credentials

use crate::error::AwsError;
use aws_config::SdkConfig;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use tether_transport::{CredentialProvider, Credentials, TransportError};

/// Credentials from the SDK provider chain, refreshed on every resolve
#[derive(Debug, Clone)]
pub struct SdkCredentials {
    provider: SharedCredentialsProvider,
    region: Option<String>,
}

impl SdkCredentials {
    /// Credentials of `config`
    ///
    /// # Errors
    /// - `AwsError::NoCredentials` if the configuration has no provider
    pub fn new(config: &SdkConfig) -> Result<Self, AwsError> {
        Ok(Self {
            provider: config.credentials_provider().ok_or(AwsError::NoCredentials)?,
            region: config.region().map(ToString::to_string),
        })
    }
}

/// Bridge credentials from resolved SDK credentials
pub(crate) fn from_sdk(
    resolved: &aws_credential_types::Credentials,
    region: Option<&str>,
) -> Credentials {
    let mut credentials = Credentials::new(resolved.access_key_id(), resolved.secret_access_key());
    credentials.session_token = resolved.session_token().map(str::to_string);
    credentials.region = region.map(str::to_string);
    credentials
}

#[async_trait::async_trait]
impl CredentialProvider for SdkCredentials {
    async fn credentials(&self) -> Result<Credentials, TransportError> {
        let resolved = self
            .provider
            .provide_credentials()
            .await
            .map_err(|e| TransportError::Credentials(e.to_string()))?;
        Ok(from_sdk(&resolved, self.region.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_config::{BehaviorVersion, Region};
    use pretty_assertions::assert_eq;

    fn sdk_config() -> SdkConfig {
        let keys = aws_credential_types::Credentials::new("AKIA", "secret", Some("token".into()), None, "test");
        SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .credentials_provider(SharedCredentialsProvider::new(keys))
            .build()
    }

    #[tokio::test]
    async fn resolves_through_the_provider() {
        let credentials = SdkCredentials::new(&sdk_config()).unwrap().credentials().await.unwrap();
        assert_eq!(
            credentials,
            Credentials::new("AKIA", "secret")
                .with_session_token("token")
                .with_region("eu-west-1")
        );
    }

    #[test]
    fn missing_provider_is_reported() {
        let bare = SdkConfig::builder().region(Region::new("eu-west-1")).build();
        assert!(matches!(SdkCredentials::new(&bare), Err(AwsError::NoCredentials)));
    }
}
