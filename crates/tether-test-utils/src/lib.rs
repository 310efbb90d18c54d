//! Testing utilities for the tether workspace
//!
//! Shared fixtures and an in-memory [`CloudApi`] implementation.

#![allow(missing_docs)]

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tether_core::FunctionDescriptor;
use tether_infra::{
    CloudApi, FunctionConfiguration, FunctionUpdate, LayerPage, LayerVersion, PublishLayerRequest,
    ReconcileError,
};
use tether_sandbox::{HandlerTable, InvocationContext};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

/// Layers returned per `list_layers` page
pub const LAYER_PAGE_SIZE: usize = 2;

pub fn layer_arn(layer_name: &str, version: u64) -> String {
    format!("arn:aws:lambda:{REGION}:{ACCOUNT}:layer:{layer_name}:{version}")
}

pub fn role_arn(role_name: &str) -> String {
    format!("arn:aws:iam::{ACCOUNT}:role/service/{role_name}")
}

pub fn descriptor(function_name: &str) -> FunctionDescriptor {
    FunctionDescriptor::new(function_name, format!("src/{function_name}.js")).with_handler("handler")
}

/// Deployed function with a 6 second timeout and one unrelated variable
pub fn deployed_function(function_name: &str, role_name: &str) -> FunctionConfiguration {
    FunctionConfiguration {
        function_name: function_name.to_string(),
        timeout: Some(6),
        layers: Vec::new(),
        environment: BTreeMap::from([("STAGE".to_string(), "dev".to_string())]),
        role: Some(role_arn(role_name)),
    }
}

/// Handler table with `{module}.handler` echoing its event and marker variables
pub fn echo_table(module: &str) -> HandlerTable {
    HandlerTable::new().with(
        format!("{module}.handler"),
        |event: Value, ctx: InvocationContext| async move {
            Ok(json!({
                "echo": event,
                "isLocal": ctx.env("IS_LOCAL"),
            }))
        },
    )
}

#[derive(Default)]
struct CloudState {
    functions: BTreeMap<String, FunctionConfiguration>,
    layers: BTreeMap<String, Vec<LayerVersion>>,
    next_version: BTreeMap<String, u64>,
    policies: BTreeMap<(String, String), String>,
    failing_updates: BTreeSet<String>,
    failing_reads: BTreeSet<String>,
    failing_publish: bool,
    calls: Vec<String>,
}

/// In-memory cloud account; clones share state
#[derive(Clone, Default)]
pub struct MemoryCloud {
    state: Arc<Mutex<CloudState>>,
}

impl std::fmt::Debug for MemoryCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryCloud")
            .field("functions", &state.functions.len())
            .field("layers", &state.layers.len())
            .field("policies", &state.policies.len())
            .finish()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(self, configuration: FunctionConfiguration) -> Self {
        self.state
            .lock()
            .functions
            .insert(configuration.function_name.clone(), configuration);
        self
    }

    pub fn with_layer_version(self, layer_name: &str, description: &str) -> Self {
        self.publish(layer_name, description.to_string());
        self
    }

    pub fn with_policy(self, role_name: &str, policy_name: &str, document: &str) -> Self {
        self.state.lock().policies.insert(
            (role_name.to_string(), policy_name.to_string()),
            document.to_string(),
        );
        self
    }

    /// Layers that exist only to fill `list_layers` pages
    pub fn with_other_layers(self, names: &[&str]) -> Self {
        for name in names {
            self.publish(name, "unrelated".to_string());
        }
        self
    }

    /// Make every mutation of a function or role fail
    pub fn fail_updates_for(&self, target: &str) {
        self.state.lock().failing_updates.insert(target.to_string());
    }

    /// Make configuration reads of a function fail
    pub fn fail_reads_for(&self, function_name: &str) {
        self.state.lock().failing_reads.insert(function_name.to_string());
    }

    pub fn fail_publish(&self) {
        self.state.lock().failing_publish = true;
    }

    pub fn function(&self, function_name: &str) -> Option<FunctionConfiguration> {
        self.state.lock().functions.get(function_name).cloned()
    }

    pub fn role_policy(&self, role_name: &str, policy_name: &str) -> Option<String> {
        self.state
            .lock()
            .policies
            .get(&(role_name.to_string(), policy_name.to_string()))
            .cloned()
    }

    pub fn layer_versions(&self, layer_name: &str) -> Vec<LayerVersion> {
        self.state.lock().layers.get(layer_name).cloned().unwrap_or_default()
    }

    /// Every API call, as `operation target`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of one operation
    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    fn record(&self, operation: &str, target: &str) {
        self.state.lock().calls.push(format!("{operation} {target}"));
    }

    fn publish(&self, layer_name: &str, description: String) -> LayerVersion {
        let mut state = self.state.lock();
        let next = state.next_version.entry(layer_name.to_string()).or_insert(0);
        *next += 1;
        let version = LayerVersion {
            layer_version_arn: layer_arn(layer_name, *next),
            version: *next,
            description: Some(description),
        };
        state
            .layers
            .entry(layer_name.to_string())
            .or_default()
            .push(version.clone());
        version
    }

    fn check_update(&self, operation: &'static str, target: &str) -> Result<(), ReconcileError> {
        if self.state.lock().failing_updates.contains(target) {
            return Err(ReconcileError::api(operation, target, "AccessDeniedException"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CloudApi for MemoryCloud {
    async fn list_layer_versions(&self, layer_name: &str) -> Result<Vec<LayerVersion>, ReconcileError> {
        self.record("list_layer_versions", layer_name);
        let mut versions = self.layer_versions(layer_name);
        versions.reverse();
        Ok(versions)
    }

    async fn publish_layer_version(
        &self,
        request: PublishLayerRequest,
    ) -> Result<LayerVersion, ReconcileError> {
        self.record("publish_layer_version", &request.layer_name);
        if self.state.lock().failing_publish {
            return Err(ReconcileError::api(
                "publish_layer_version",
                request.layer_name,
                "CodeStorageExceededException",
            ));
        }
        Ok(self.publish(&request.layer_name, request.description))
    }

    async fn delete_layer_version(&self, layer_name: &str, version: u64) -> Result<(), ReconcileError> {
        self.record("delete_layer_version", &format!("{layer_name}:{version}"));
        let mut state = self.state.lock();
        if let Some(versions) = state.layers.get_mut(layer_name) {
            versions.retain(|v| v.version != version);
            if versions.is_empty() {
                state.layers.remove(layer_name);
            }
        }
        Ok(())
    }

    async fn list_layers(&self, marker: Option<String>) -> Result<LayerPage, ReconcileError> {
        self.record("list_layers", marker.as_deref().unwrap_or("-"));
        let start = marker.and_then(|m| m.parse::<usize>().ok()).unwrap_or(0);
        let names: Vec<String> = self.state.lock().layers.keys().cloned().collect();
        let end = (start + LAYER_PAGE_SIZE).min(names.len());

        Ok(LayerPage {
            layer_names: names.get(start..end).map(<[String]>::to_vec).unwrap_or_default(),
            next_marker: (end < names.len()).then(|| end.to_string()),
        })
    }

    async fn get_function_configuration(
        &self,
        function_name: &str,
    ) -> Result<FunctionConfiguration, ReconcileError> {
        self.record("get_function_configuration", function_name);
        let state = self.state.lock();
        if state.failing_reads.contains(function_name) {
            return Err(ReconcileError::Throttled {
                operation: "get_function_configuration",
                target: function_name.to_string(),
            });
        }
        state.functions.get(function_name).cloned().ok_or_else(|| {
            ReconcileError::api(
                "get_function_configuration",
                function_name,
                "ResourceNotFoundException",
            )
        })
    }

    async fn update_function_configuration(&self, update: FunctionUpdate) -> Result<(), ReconcileError> {
        self.record("update_function_configuration", &update.function_name);
        self.check_update("update_function_configuration", &update.function_name)?;

        let mut state = self.state.lock();
        let current = state.functions.get_mut(&update.function_name).ok_or_else(|| {
            ReconcileError::api(
                "update_function_configuration",
                &update.function_name,
                "ResourceNotFoundException",
            )
        })?;
        current.layers = update.layers;
        current.environment = update.environment;
        if update.timeout.is_some() {
            current.timeout = update.timeout;
        }
        Ok(())
    }

    async fn get_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<Option<String>, ReconcileError> {
        self.record("get_role_policy", role_name);
        Ok(self.role_policy(role_name, policy_name))
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: String,
    ) -> Result<(), ReconcileError> {
        self.record("put_role_policy", role_name);
        self.check_update("put_role_policy", role_name)?;
        self.state
            .lock()
            .policies
            .insert((role_name.to_string(), policy_name.to_string()), document);
        Ok(())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<(), ReconcileError> {
        self.record("delete_role_policy", role_name);
        self.check_update("delete_role_policy", role_name)?;
        self.state
            .lock()
            .policies
            .remove(&(role_name.to_string(), policy_name.to_string()));
        Ok(())
    }
}
