//! Registry of discovered functions
//!
//! The discovery collaborator hands over a list of descriptors; the catalog
//! keeps them addressable by function id for the build engine, the sandbox
//! pool and the reconciler.

use crate::error::CoreError;
use crate::types::{FunctionDescriptor, FunctionId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name filter applied to the discovered functions
///
/// Supports an exact name, a `prefix*`, a `*suffix` or `*` alone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameFilter(Option<String>);

impl NameFilter {
    /// Filter that accepts every function
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self(None)
    }

    /// Filter by pattern
    #[inline]
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self(Some(pattern.into()))
    }

    /// Whether a function name passes the filter
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let Some(pattern) = self.0.as_deref() else {
            return true;
        };
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return name.starts_with(prefix);
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return name.ends_with(suffix);
        }
        name == pattern
    }
}

impl From<Option<String>> for NameFilter {
    fn from(value: Option<String>) -> Self {
        Self(value)
    }
}

/// Shared, replaceable set of discovered functions
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    inner: Arc<RwLock<BTreeMap<FunctionId, FunctionDescriptor>>>,
}

impl FunctionCatalog {
    /// Create an empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog from a discovered list
    #[must_use]
    pub fn from_descriptors(functions: impl IntoIterator<Item = FunctionDescriptor>) -> Self {
        let catalog = Self::new();
        catalog.replace(functions);
        catalog
    }

    /// Replace the catalog content
    ///
    /// Returns `true` when the discovered list differs from the current one.
    pub fn replace(&self, functions: impl IntoIterator<Item = FunctionDescriptor>) -> bool {
        let next: BTreeMap<FunctionId, FunctionDescriptor> = functions
            .into_iter()
            .map(|f| (f.function_id(), f))
            .collect();

        let mut guard = self.inner.write();
        if *guard == next {
            return false;
        }
        *guard = next;

        tracing::info!("Found the following functions to debug:");
        for func in guard.values() {
            tracing::info!(
                " - {} code: {}",
                func.function_name,
                func.code_path.display()
            );
        }
        true
    }

    /// Look up a function by id
    ///
    /// # Errors
    /// - `CoreError::FunctionNotFound` if the id was never discovered
    pub fn get(&self, function_id: &FunctionId) -> Result<FunctionDescriptor, CoreError> {
        self.inner
            .read()
            .get(function_id)
            .cloned()
            .ok_or_else(|| CoreError::FunctionNotFound(function_id.to_string()))
    }

    /// All discovered functions
    #[must_use]
    pub fn all(&self) -> Vec<FunctionDescriptor> {
        self.inner.read().values().cloned().collect()
    }

    /// Functions passing a name filter
    #[must_use]
    pub fn in_scope(&self, filter: &NameFilter) -> Vec<FunctionDescriptor> {
        self.inner
            .read()
            .values()
            .filter(|f| filter.matches(&f.function_name))
            .cloned()
            .collect()
    }

    /// Number of discovered functions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether nothing was discovered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
