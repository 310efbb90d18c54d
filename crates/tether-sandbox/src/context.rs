//! Synthetic platform context handed to handlers running locally
//!
//! Carries the serialisable part of the cloud context plus the worker's
//! environment. The remaining-time query always answers a very large
//! constant; the legacy completion callbacks are not supported and fail.

use serde_json::Value;
use std::collections::BTreeMap;
use tether_core::HandlerFailure;

/// Remaining time reported to local handlers (`i32::MAX` milliseconds)
pub const REMAINING_TIME_MILLIS: i64 = 2_147_483_647;

/// Platform context as seen by a local handler
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationContext {
    fields: Value,
    environment: BTreeMap<String, String>,
}

impl InvocationContext {
    /// Create from the forwarded context and the worker environment
    #[must_use]
    pub fn new(fields: Value, environment: BTreeMap<String, String>) -> Self {
        Self { fields, environment }
    }

    /// Forwarded context fields
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Value {
        &self.fields
    }

    /// One forwarded field as text
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Platform request id
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.field("awsRequestId")
    }

    /// Deployed function name
    #[must_use]
    pub fn function_name(&self) -> Option<&str> {
        self.field("functionName")
    }

    /// Environment variable of this worker
    #[must_use]
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }

    /// Whole worker environment
    #[inline]
    #[must_use]
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Milliseconds left before the platform would time out
    #[inline]
    #[must_use]
    pub fn remaining_time_millis(&self) -> i64 {
        REMAINING_TIME_MILLIS
    }

    /// Legacy completion callback; not supported locally
    ///
    /// # Errors
    /// Always.
    pub fn done(&self) -> Result<(), HandlerFailure> {
        Err(unsupported("done"))
    }

    /// Legacy failure callback; not supported locally
    ///
    /// # Errors
    /// Always.
    pub fn fail(&self) -> Result<(), HandlerFailure> {
        Err(unsupported("fail"))
    }

    /// Legacy success callback; not supported locally
    ///
    /// # Errors
    /// Always.
    pub fn succeed(&self) -> Result<(), HandlerFailure> {
        Err(unsupported("succeed"))
    }
}

fn unsupported(callback: &str) -> HandlerFailure {
    HandlerFailure::new(
        "Error",
        format!("`{callback}` function on the platform context is not supported when running locally"),
    )
}
