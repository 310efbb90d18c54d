//! Invocation strategies
//!
//! The strategy is chosen once per cold start from the function's mirror flag:
//! - [`BlockingStrategy`]: forward to the developer machine and wait
//! - [`MirrorStrategy`]: run the real handler, publish a throttled copy

mod blocking;
mod mirror;

pub use blocking::BlockingStrategy;
pub use mirror::MirrorStrategy;

use crate::error::InterceptorError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tether_core::{FunctionId, WorkerId};
use tether_transport::{Envelope, InvokeRequest, Routing};

/// Message returned when the developer machine did not answer in time
pub const DEGRADED_MESSAGE: &str = "The function is in live debug mode but it has not heard back from \
    the developer machine yet. Make sure the debugger is running and connected, then invoke again.";

/// One invocation as handed over by the platform runtime
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformInvocation {
    /// Platform request id
    pub request_id: String,
    /// Milliseconds the invocation has left
    pub remaining_millis: i64,
    /// Event payload
    pub event: Value,
    /// Serialisable part of the platform context
    pub context: Value,
    /// Environment of the execution environment
    pub environment: BTreeMap<String, String>,
}

impl PlatformInvocation {
    /// Invocation with empty context and environment
    #[must_use]
    pub fn new(request_id: impl Into<String>, event: Value) -> Self {
        Self {
            request_id: request_id.into(),
            remaining_millis: 0,
            event,
            context: Value::Object(serde_json::Map::new()),
            environment: BTreeMap::new(),
        }
    }

    /// With remaining time
    #[inline]
    #[must_use]
    pub fn with_remaining_millis(mut self, millis: i64) -> Self {
        self.remaining_millis = millis;
        self
    }

    /// With platform context
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// With environment
    #[inline]
    #[must_use]
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// INVOKE envelope forwarding this invocation
    #[must_use]
    pub fn to_envelope(&self, worker_id: &WorkerId, function_id: &FunctionId) -> Envelope {
        Envelope::Invoke(InvokeRequest {
            routing: Routing::new(worker_id.clone(), self.request_id.clone(), function_id.clone()),
            deadline: self.remaining_millis,
            event: self.event.clone(),
            context: self.context.clone(),
            environment: self.environment.clone(),
        })
    }
}

/// Response returned in place of a result when the developer machine is silent
#[must_use]
pub fn degraded_response() -> Value {
    json!({ "statusCode": 500, "body": DEGRADED_MESSAGE })
}

/// How an intercepted invocation is served
#[async_trait::async_trait]
pub trait InvocationStrategy: Send + Sync {
    /// Serve one invocation
    async fn handle(&self, invocation: PlatformInvocation) -> Result<Value, InterceptorError>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn envelope_carries_invocation() {
        let invocation = PlatformInvocation::new("req-1", json!({ "a": 1 }))
            .with_remaining_millis(2500)
            .with_context(json!({ "awsRequestId": "req-1" }))
            .with_environment(BTreeMap::from([("STAGE".to_string(), "dev".to_string())]));

        let Envelope::Invoke(request) = invocation.to_envelope(&WorkerId::new("w1"), &FunctionId::new("orders"))
        else {
            panic!("expected INVOKE");
        };
        assert_eq!(request.routing, Routing::new("w1".into(), "req-1", "orders".into()));
        assert_eq!(request.deadline, 2500);
        assert_eq!(request.event, json!({ "a": 1 }));
        assert_eq!(request.environment["STAGE"], "dev");
    }

    #[test]
    fn degraded_response_shape() {
        let response = degraded_response();
        assert_eq!(response["statusCode"], 500);
        assert_eq!(response["body"], DEGRADED_MESSAGE);
    }
}
