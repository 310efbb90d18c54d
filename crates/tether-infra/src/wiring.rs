//! Per-function wiring rules
//!
//! Pure computations over a [`FunctionConfiguration`]:
//! - which layer ARNs belong to the bridge
//! - the environment the bridge injects, including the remembered timeout
//!   and any wrapper that was configured before
//! - the [`FunctionUpdate`] that attaches or detaches the bridge, or `None`
//!   when the function is already in the wanted state

use crate::api::{FunctionConfiguration, FunctionUpdate};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tether_core::{env, SessionId};

/// Name of the bridge layer
pub const LAYER_NAME: &str = "TetherBridge";

/// Name of the inline policy granting broker access
pub const POLICY_NAME: &str = "TetherBridgePolicy";

/// Architectures the layer is published for
pub const ARCHITECTURES: [&str; 2] = ["x86_64", "arm64"];

/// Wrapper script the bridge layer installs at [`env::WRAPPER_PATH`]
///
/// Exports the configured handler as `TETHER_ORIGINAL_HANDLER` and execs the
/// runtime command it is handed.
pub const WRAPPER_SCRIPT: &str = include_str!("../layer/tether-wrapper");

/// Description identifying the layer built for `version`
#[must_use]
pub fn layer_description(version: &str) -> String {
    format!("Tether layer version {version}")
}

/// Inline policy document granting broker access
#[must_use]
pub fn policy_document() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Action": "iot:*",
                "Resource": "*",
                "Effect": "Allow"
            }
        ]
    })
}

/// Whether an existing policy document grants what [`policy_document`] grants
#[must_use]
pub fn policy_matches(document: &str) -> bool {
    serde_json::from_str::<Value>(document).is_ok_and(|existing| existing == policy_document())
}

/// Whether a layer version ARN is a version of the bridge layer
#[must_use]
pub fn is_bridge_layer(arn: &str) -> bool {
    arn.contains(&format!(":layer:{LAYER_NAME}:"))
}

/// Role name from a role ARN (`arn:...:role/path/name` yields `name`)
#[must_use]
pub fn role_name(role_arn: &str) -> Option<&str> {
    role_arn.rsplit('/').next().filter(|name| !name.is_empty() && !name.contains(':'))
}

/// Session-wide inputs of the wiring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiringSettings {
    /// Session the functions report to
    pub session_id: SessionId,
    /// Mirror mode
    pub mirror: bool,
    /// Mirror interval
    pub mirror_interval: Duration,
    /// How long the interceptor waits for the developer machine
    pub fallback_timeout: Duration,
    /// Verbose cloud-side logging
    pub verbose: bool,
    /// Minimum timeout of an attached function
    pub timeout_floor_secs: u32,
}

fn flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

fn is_bridge_variable(name: &str, value: &str) -> bool {
    if name == env::EXEC_WRAPPER {
        value == env::WRAPPER_PATH
    } else {
        env::INJECTED.contains(&name)
    }
}

/// Whether any trace of the bridge is present
#[must_use]
pub fn is_wired(current: &FunctionConfiguration) -> bool {
    current.layers.iter().any(|arn| is_bridge_layer(arn))
        || current
            .environment
            .iter()
            .any(|(name, value)| is_bridge_variable(name, value))
}

/// Variables the bridge wants set on the function
#[must_use]
pub fn bridge_environment(
    current: &FunctionConfiguration,
    settings: &WiringSettings,
) -> BTreeMap<String, String> {
    let existing = &current.environment;

    let initial_timeout = existing
        .get(env::INITIAL_TIMEOUT)
        .filter(|value| value.parse::<i64>().is_ok())
        .cloned()
        .unwrap_or_else(|| current.timeout.map_or_else(|| "-1".to_string(), |t| t.to_string()));

    let previous_wrapper = existing.get(env::PREVIOUS_WRAPPER).cloned().or_else(|| {
        existing
            .get(env::EXEC_WRAPPER)
            .filter(|wrapper| wrapper.as_str() != env::WRAPPER_PATH)
            .cloned()
    });

    let mut vars = BTreeMap::from([
        (env::FUNCTION_ID.to_string(), current.function_name.clone()),
        (env::SESSION_ID.to_string(), settings.session_id.to_string()),
        (env::INITIAL_TIMEOUT.to_string(), initial_timeout),
        (env::MIRROR_MODE.to_string(), flag(settings.mirror)),
        (
            env::MIRROR_INTERVAL.to_string(),
            settings.mirror_interval.as_millis().to_string(),
        ),
        (
            env::FALLBACK_TIMEOUT.to_string(),
            settings.fallback_timeout.as_millis().to_string(),
        ),
        (env::VERBOSE.to_string(), flag(settings.verbose)),
        (env::EXEC_WRAPPER.to_string(), env::WRAPPER_PATH.to_string()),
    ]);
    if let Some(previous) = previous_wrapper {
        vars.insert(env::PREVIOUS_WRAPPER.to_string(), previous);
    }
    vars
}

/// Update attaching the bridge, `None` if it is already attached as wanted
#[must_use]
pub fn attach_update(
    current: &FunctionConfiguration,
    layer_arn: &str,
    settings: &WiringSettings,
) -> Option<FunctionUpdate> {
    let wanted = bridge_environment(current, settings);
    let floor = settings.timeout_floor_secs;

    let layer_attached = current.layers.iter().any(|arn| arn == layer_arn);
    let stale_layer = current
        .layers
        .iter()
        .any(|arn| is_bridge_layer(arn) && arn != layer_arn);
    let env_differs = wanted
        .iter()
        .any(|(name, value)| current.environment.get(name) != Some(value));
    let timeout_low = !matches!(current.timeout, Some(t) if t >= floor);

    if layer_attached && !stale_layer && !env_differs && !timeout_low {
        return None;
    }

    let mut layers = vec![layer_arn.to_string()];
    layers.extend(current.layers.iter().filter(|arn| !is_bridge_layer(arn)).cloned());

    let mut environment = current.environment.clone();
    environment.extend(wanted);

    Some(FunctionUpdate {
        function_name: current.function_name.clone(),
        layers,
        environment,
        timeout: Some(current.timeout.map_or(floor, |t| t.max(floor))),
    })
}

/// Update removing every trace of the bridge, `None` if there is none
///
/// The timeout recorded at attach time and any chained wrapper are restored.
#[must_use]
pub fn detach_update(current: &FunctionConfiguration) -> Option<FunctionUpdate> {
    if !is_wired(current) {
        return None;
    }

    let initial_timeout = current
        .environment
        .get(env::INITIAL_TIMEOUT)
        .and_then(|value| value.parse::<u32>().ok());
    let previous_wrapper = current.environment.get(env::PREVIOUS_WRAPPER).cloned();

    let mut environment: BTreeMap<String, String> = current
        .environment
        .iter()
        .filter(|(name, value)| !is_bridge_variable(name, value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if let Some(previous) = previous_wrapper {
        environment.insert(env::EXEC_WRAPPER.to_string(), previous);
    }

    Some(FunctionUpdate {
        function_name: current.function_name.clone(),
        layers: current
            .layers
            .iter()
            .filter(|arn| !is_bridge_layer(arn))
            .cloned()
            .collect(),
        environment,
        timeout: initial_timeout.or(current.timeout),
    })
}
