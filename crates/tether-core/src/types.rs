//! Core types shared by every tether crate
//!
//! Defines the identities that flow through the bridge:
//! - Function, worker and session identifiers
//! - The discovered function descriptor and its bundling hints

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Handler export used when a descriptor does not name one
pub const DEFAULT_HANDLER: &str = "handler";

/// Fixed session id used by every mirror-mode session
pub const MIRROR_SESSION_ID: &str = "MIRROR_MODE";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier text
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a deployable function (its deployed name)
    FunctionId
);

string_id!(
    /// Identifier of one cloud execution environment
    ///
    /// Generated once per cold start and stable across warm invocations.
    WorkerId
);

string_id!(
    /// Identifier of one local debugging session
    SessionId
);

impl WorkerId {
    /// Generate a fresh random worker id (16 random bytes, hex encoded)
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }
}

impl SessionId {
    /// Session id shared by all mirror-mode sessions
    #[inline]
    #[must_use]
    pub fn mirror() -> Self {
        Self(MIRROR_SESSION_ID.to_string())
    }

    /// Whether this is the mirror-mode sentinel
    #[inline]
    #[must_use]
    pub fn is_mirror(&self) -> bool {
        self.0 == MIRROR_SESSION_ID
    }

    /// Aggregate inbound topic, `{session}/events`
    #[must_use]
    pub fn events_topic(&self) -> String {
        format!("{}/events", self.0)
    }

    /// Per-worker outbound topic, `{session}/events/{worker}`
    #[must_use]
    pub fn worker_topic(&self, worker_id: &WorkerId) -> String {
        format!("{}/events/{}", self.0, worker_id)
    }
}

/// Module format of a compiled artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleFormat {
    /// ECMAScript modules
    #[serde(rename = "esm")]
    Esm,
    /// CommonJS modules
    #[serde(rename = "cjs")]
    CommonJs,
}

impl std::fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Esm => f.write_str("ESM"),
            Self::CommonJs => f.write_str("CJS"),
        }
    }
}

/// Per-function bundling hints supplied by discovery
///
/// Every field is optional; unset fields fall back to build defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BundlingHints {
    pub format: Option<ModuleFormat>,
    pub target: Option<String>,
    pub platform: Option<String>,
    pub minify: Option<bool>,
    pub external: Option<Vec<String>>,
    pub main_fields: Option<Vec<String>>,
    pub conditions: Option<Vec<String>>,
    pub resolve_extensions: Option<Vec<String>>,
    pub node_paths: Option<Vec<String>>,
    pub plugins: Option<Vec<String>>,
    pub alias: Option<BTreeMap<String, String>>,
    pub loader: Option<BTreeMap<String, String>>,
    pub define: Option<BTreeMap<String, String>>,
    pub out_extension: Option<BTreeMap<String, String>>,
    pub banner: Option<BTreeMap<String, String>>,
    pub footer: Option<BTreeMap<String, String>>,
}

/// One discovered deployable function
///
/// Produced by an external discovery collaborator; read-only to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDescriptor {
    /// Deployed function name
    pub function_name: String,
    /// Path to the handler source file
    pub code_path: PathBuf,
    /// Exported handler name
    #[serde(default)]
    pub handler_name: Option<String>,
    /// Package manifest governing the handler's dependencies
    #[serde(default)]
    pub package_manifest_path: Option<PathBuf>,
    /// Bundle even when the source is directly executable
    #[serde(default)]
    pub force_bundle: bool,
    /// Bundling hints
    #[serde(default)]
    pub bundling: BundlingHints,
    /// Infrastructure-as-code tool the function was discovered from
    #[serde(default)]
    pub framework: Option<String>,
    /// Free-form discovery metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl FunctionDescriptor {
    /// Create a descriptor with only the required fields
    #[must_use]
    pub fn new(function_name: impl Into<String>, code_path: impl Into<PathBuf>) -> Self {
        Self {
            function_name: function_name.into(),
            code_path: code_path.into(),
            handler_name: None,
            package_manifest_path: None,
            force_bundle: false,
            bundling: BundlingHints::default(),
            framework: None,
            metadata: BTreeMap::new(),
        }
    }

    /// With exported handler name
    #[inline]
    #[must_use]
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler_name = Some(handler.into());
        self
    }

    /// With package manifest path
    #[inline]
    #[must_use]
    pub fn with_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.package_manifest_path = Some(path.into());
        self
    }

    /// With bundling hints
    #[inline]
    #[must_use]
    pub fn with_bundling(mut self, hints: BundlingHints) -> Self {
        self.bundling = hints;
        self
    }

    /// Force bundling even for directly executable sources
    #[inline]
    #[must_use]
    pub fn force_bundle(mut self) -> Self {
        self.force_bundle = true;
        self
    }

    /// Function id (the deployed name)
    #[inline]
    #[must_use]
    pub fn function_id(&self) -> FunctionId {
        FunctionId::new(self.function_name.clone())
    }

    /// Handler export name, defaulting to `handler`
    #[inline]
    #[must_use]
    pub fn handler(&self) -> &str {
        self.handler_name.as_deref().unwrap_or(DEFAULT_HANDLER)
    }

    /// Whether the source can run without a compile step
    #[must_use]
    pub fn is_directly_executable(&self) -> bool {
        !self.force_bundle && is_script_path(&self.code_path)
    }
}

/// Structured failure of a handler invocation
///
/// Crosses the wire inside ERROR envelopes and is what the sandbox returns
/// for a throw, a panic or a crashed execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerFailure {
    /// Error class name
    pub error_type: String,
    /// Human-readable message
    pub error_message: String,
    /// Stack trace or backtrace, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl HandlerFailure {
    /// Create a failure without a trace
    #[must_use]
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            trace: None,
        }
    }

    /// With trace
    #[inline]
    #[must_use]
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.error_message)
    }
}

impl std::error::Error for HandlerFailure {}

/// Whether a path names a plain script (`.js`, `.mjs`, `.cjs`)
#[must_use]
pub fn is_script_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("js" | "mjs" | "cjs")
    )
}
