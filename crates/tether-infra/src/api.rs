//! Cloud management API seam
//!
//! The reconciler only needs a narrow slice of the provider's management
//! surface: layer versions, function configuration and inline role policies.

use crate::error::ReconcileError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One published version of a layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerVersion {
    /// Version ARN
    pub layer_version_arn: String,
    /// Version number
    pub version: u64,
    /// Content description
    #[serde(default)]
    pub description: Option<String>,
}

/// Layer version to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishLayerRequest {
    /// Layer name
    pub layer_name: String,
    /// Content description, used to recognise the version later
    pub description: String,
    /// Zip archive
    pub content: Vec<u8>,
    /// Compatible instruction set architectures
    pub compatible_architectures: Vec<String>,
}

/// One page of layer names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerPage {
    /// Layer names on this page
    pub layer_names: Vec<String>,
    /// Marker of the next page
    pub next_marker: Option<String>,
}

/// Current configuration of a deployed function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfiguration {
    /// Deployed function name
    pub function_name: String,
    /// Timeout in seconds, when reported
    #[serde(default)]
    pub timeout: Option<u32>,
    /// Attached layer version ARNs, in order
    #[serde(default)]
    pub layers: Vec<String>,
    /// Environment variables
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Execution role ARN
    #[serde(default)]
    pub role: Option<String>,
}

/// Replacement of a function's layers, environment and timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUpdate {
    /// Deployed function name
    pub function_name: String,
    /// New layer list
    pub layers: Vec<String>,
    /// New environment
    pub environment: BTreeMap<String, String>,
    /// New timeout in seconds
    pub timeout: Option<u32>,
}

/// Cloud management operations used by the reconciler
#[async_trait::async_trait]
pub trait CloudApi: Send + Sync {
    /// Versions of a layer
    async fn list_layer_versions(&self, layer_name: &str) -> Result<Vec<LayerVersion>, ReconcileError>;

    /// Publish a new layer version
    async fn publish_layer_version(
        &self,
        request: PublishLayerRequest,
    ) -> Result<LayerVersion, ReconcileError>;

    /// Delete one layer version
    async fn delete_layer_version(&self, layer_name: &str, version: u64) -> Result<(), ReconcileError>;

    /// One page of the account's layers
    async fn list_layers(&self, marker: Option<String>) -> Result<LayerPage, ReconcileError>;

    /// Current configuration of a function
    async fn get_function_configuration(
        &self,
        function_name: &str,
    ) -> Result<FunctionConfiguration, ReconcileError>;

    /// Replace a function's layers, environment and timeout
    async fn update_function_configuration(&self, update: FunctionUpdate) -> Result<(), ReconcileError>;

    /// Inline policy document of a role, `None` when the policy does not exist
    async fn get_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<Option<String>, ReconcileError>;

    /// Create or replace an inline role policy
    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: String,
    ) -> Result<(), ReconcileError>;

    /// Delete an inline role policy
    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<(), ReconcileError>;
}
