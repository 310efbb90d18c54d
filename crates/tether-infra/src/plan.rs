//! Change sets and apply reports

use crate::api::FunctionConfiguration;

/// What happens to the bridge layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerPlan {
    /// No layer operation
    Unchanged,
    /// A version matching this build exists
    Reuse(String),
    /// A new version has to be published
    Publish,
}

/// Function to attach or detach, with the configuration it was planned from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionChange {
    /// Configuration read while planning
    pub current: FunctionConfiguration,
}

impl FunctionChange {
    /// Deployed function name
    #[inline]
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.current.function_name
    }
}

/// Difference between the cloud and the wanted wiring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraChangeSet {
    /// Layer operation
    pub layer: LayerPlan,
    /// Functions that need the bridge attached or refreshed
    pub attach: Vec<FunctionChange>,
    /// Functions that still carry bridge wiring and must be cleaned
    pub detach: Vec<FunctionChange>,
    /// Roles that need the broker policy
    pub grant_roles: Vec<String>,
    /// Roles whose broker policy must go
    pub revoke_roles: Vec<String>,
    /// Targets that could not be inspected while planning
    pub unreadable: Vec<TargetFailure>,
}

impl InfraChangeSet {
    /// Change set without operations
    #[must_use]
    pub fn empty() -> Self {
        Self {
            layer: LayerPlan::Unchanged,
            attach: Vec::new(),
            detach: Vec::new(),
            grant_roles: Vec::new(),
            revoke_roles: Vec::new(),
            unreadable: Vec::new(),
        }
    }

    /// Whether applying would change nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layer != LayerPlan::Publish
            && self.attach.is_empty()
            && self.detach.is_empty()
            && self.grant_roles.is_empty()
            && self.revoke_roles.is_empty()
    }

    /// Names of functions to attach
    #[must_use]
    pub fn attach_names(&self) -> Vec<&str> {
        self.attach.iter().map(FunctionChange::function_name).collect()
    }

    /// Names of functions to detach
    #[must_use]
    pub fn detach_names(&self) -> Vec<&str> {
        self.detach.iter().map(FunctionChange::function_name).collect()
    }
}

/// Object of a reconciliation operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// The bridge layer
    Layer,
    /// A function
    Function(String),
    /// An execution role
    Role(String),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Layer => f.write_str("layer"),
            Self::Function(name) => write!(f, "function {name}"),
            Self::Role(name) => write!(f, "role {name}"),
        }
    }
}

/// An operation that failed for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    /// Failed target
    pub target: Target,
    /// Failure description
    pub message: String,
}

/// Outcome of [`crate::Reconciler::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Layer version the functions were attached to
    pub layer_arn: Option<String>,
    /// Whether a new layer version was published
    pub layer_published: bool,
    /// Functions attached
    pub attached: Vec<String>,
    /// Functions detached
    pub detached: Vec<String>,
    /// Roles granted the broker policy
    pub granted: Vec<String>,
    /// Roles whose broker policy was removed
    pub revoked: Vec<String>,
    /// Operations that failed; unrelated operations still ran
    pub failures: Vec<TargetFailure>,
}

impl ApplyReport {
    /// Whether every operation succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, target: Target, error: &dyn std::fmt::Display) {
        tracing::error!(object = %target, %error, "Reconciliation step failed");
        self.failures.push(TargetFailure {
            target,
            message: error.to_string(),
        });
    }
}
