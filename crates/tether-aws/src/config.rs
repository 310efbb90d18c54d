//! Provider configuration
//!
//! [`AwsSettings`] carries the region, named profile and role from the tether
//! config. [`AwsServices`] resolves them once into an SDK configuration and
//! hands out every adapter built on it.

use crate::cloud::AwsCloud;
use crate::credentials::SdkCredentials;
use crate::endpoint::IotEndpointResolver;
use crate::error::AwsError;
use crate::mqtt::MqttConnector;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use std::sync::Arc;
use tether_core::TetherConfig;
use tether_transport::BrokerAccess;

/// Session name used when assuming the configured role
pub const ROLE_SESSION_NAME: &str = "tether";

/// Region, profile and role overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsSettings {
    /// Region; the provider chain decides when unset
    pub region: Option<String>,
    /// Named credentials profile
    pub profile: Option<String>,
    /// Role ARN assumed on top of the base credentials
    pub role: Option<String>,
}

impl AwsSettings {
    /// Settings from the tether config
    #[must_use]
    pub fn from_config(config: &TetherConfig) -> Self {
        let set = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
        Self {
            region: set(&config.region),
            profile: set(&config.profile),
            role: set(&config.role),
        }
    }

    /// Resolve the SDK configuration
    ///
    /// # Errors
    /// - `AwsError::NoRegion` if no region is configured anywhere
    /// - `AwsError::NoCredentials` if no credentials provider is available
    pub async fn load(&self) -> Result<SdkConfig, AwsError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        let base = loader.load().await;

        if base.region().is_none() {
            return Err(AwsError::NoRegion);
        }
        if base.credentials_provider().is_none() {
            return Err(AwsError::NoCredentials);
        }

        let Some(role) = &self.role else {
            return Ok(base);
        };
        tracing::debug!(role, "Assuming role");
        let provider = AssumeRoleProvider::builder(role)
            .session_name(ROLE_SESSION_NAME)
            .configure(&base)
            .build()
            .await;
        Ok(base
            .into_builder()
            .credentials_provider(SharedCredentialsProvider::new(provider))
            .build())
    }
}

/// Every production adapter over one resolved SDK configuration
#[derive(Debug, Clone)]
pub struct AwsServices {
    sdk: SdkConfig,
}

impl AwsServices {
    /// Resolve `settings`
    ///
    /// # Errors
    /// See [`AwsSettings::load`]
    pub async fn load(settings: &AwsSettings) -> Result<Self, AwsError> {
        Ok(Self {
            sdk: settings.load().await?,
        })
    }

    /// Services over an already resolved configuration
    #[must_use]
    pub fn from_sdk_config(sdk: SdkConfig) -> Self {
        Self { sdk }
    }

    /// Resolved SDK configuration
    #[inline]
    #[must_use]
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk
    }

    /// Broker seams: SDK credentials, data endpoint lookup and MQTT connector
    ///
    /// # Errors
    /// - `AwsError::NoCredentials` if the configuration lost its provider
    pub fn broker_access(&self) -> Result<BrokerAccess, AwsError> {
        let credentials = SdkCredentials::new(&self.sdk)?;
        let region = self
            .sdk
            .region()
            .map(ToString::to_string)
            .ok_or(AwsError::NoRegion)?;
        Ok(BrokerAccess::new(
            Arc::new(MqttConnector::new(region)),
            Arc::new(IotEndpointResolver::new(&self.sdk)),
            Arc::new(credentials),
        ))
    }

    /// Management API for the reconciler
    #[must_use]
    pub fn cloud(&self) -> AwsCloud {
        AwsCloud::new(&self.sdk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn settings_come_from_the_config() {
        let mut config = TetherConfig::new();
        config.region = Some("eu-west-1".into());
        config.profile = Some("  ".into());
        config.role = Some("arn:aws:iam::123456789012:role/debugger".into());

        assert_eq!(
            AwsSettings::from_config(&config),
            AwsSettings {
                region: Some("eu-west-1".into()),
                profile: None,
                role: Some("arn:aws:iam::123456789012:role/debugger".into()),
            }
        );
    }

    #[test]
    fn defaults_leave_everything_to_the_provider_chain() {
        assert_eq!(AwsSettings::from_config(&TetherConfig::new()), AwsSettings::default());
    }
}
