//! Protocol messages exchanged between the cloud function and the developer machine
//!
//! Every message is an [`Envelope`]: a tagged sum over INVOKE, SUCCESS, ERROR
//! and PING. On the wire it is a JSON object `{"type": "...", "data": {...}}`
//! whose `data` always carries the routing triple `workerId`, `requestId`,
//! `functionId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tether_core::{FunctionId, HandlerFailure, WorkerId};

/// Routing fields common to every envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    /// Cloud execution environment that sent or awaits the message
    pub worker_id: WorkerId,
    /// Platform request id of the invocation
    pub request_id: String,
    /// Function the invocation belongs to
    pub function_id: FunctionId,
}

impl Routing {
    /// Create routing fields
    #[must_use]
    pub fn new(worker_id: WorkerId, request_id: impl Into<String>, function_id: FunctionId) -> Self {
        Self {
            worker_id,
            request_id: request_id.into(),
            function_id,
        }
    }
}

/// An invocation forwarded from the cloud
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    #[serde(flatten)]
    pub routing: Routing,
    /// Milliseconds the cloud invocation had left when it was forwarded
    pub deadline: i64,
    /// Invocation event payload
    pub event: Value,
    /// Serialisable part of the platform context
    pub context: Value,
    /// Environment of the cloud execution environment
    #[serde(rename = "env", default)]
    pub environment: BTreeMap<String, String>,
}

/// A successful local execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeSuccess {
    #[serde(flatten)]
    pub routing: Routing,
    /// Value returned by the handler
    #[serde(default)]
    pub body: Value,
}

/// A failed local execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeFailure {
    #[serde(flatten)]
    pub routing: Routing,
    #[serde(flatten)]
    pub failure: HandlerFailure,
}

/// One logical protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "UPPERCASE")]
pub enum Envelope {
    /// Cloud asks the developer machine to run an invocation
    Invoke(InvokeRequest),
    /// Developer machine returns a result
    Success(InvokeSuccess),
    /// Developer machine returns a failure
    Error(InvokeFailure),
    /// Developer machine confirms it is alive and working on the request
    Ping(Routing),
}

/// Discriminant of an [`Envelope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Invoke,
    Success,
    Error,
    Ping,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Invoke => "INVOKE",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Ping => "PING",
        };
        f.write_str(name)
    }
}

impl Envelope {
    /// PING answering the given routing
    #[inline]
    #[must_use]
    pub fn ping(routing: Routing) -> Self {
        Self::Ping(routing)
    }

    /// SUCCESS carrying a handler result
    #[inline]
    #[must_use]
    pub fn success(routing: Routing, body: Value) -> Self {
        Self::Success(InvokeSuccess { routing, body })
    }

    /// ERROR carrying a handler failure
    #[inline]
    #[must_use]
    pub fn failure(routing: Routing, failure: HandlerFailure) -> Self {
        Self::Error(InvokeFailure { routing, failure })
    }

    /// Routing fields of any variant
    #[must_use]
    pub fn routing(&self) -> &Routing {
        match self {
            Self::Invoke(request) => &request.routing,
            Self::Success(success) => &success.routing,
            Self::Error(failure) => &failure.routing,
            Self::Ping(routing) => routing,
        }
    }

    /// Discriminant
    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Invoke(_) => EnvelopeKind::Invoke,
            Self::Success(_) => EnvelopeKind::Success,
            Self::Error(_) => EnvelopeKind::Error,
            Self::Ping(_) => EnvelopeKind::Ping,
        }
    }

    /// Serialize to the JSON wire form
    ///
    /// # Errors
    /// - `serde_json::Error` if a payload value cannot be serialized
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the JSON wire form
    ///
    /// # Errors
    /// - `serde_json::Error` on malformed or unknown messages
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
