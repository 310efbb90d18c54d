//! Per-function incremental build cache
//!
//! One entry per function holds:
//! - the compiler context, reused across rebuilds
//! - the pending (or finished) build shared by every concurrent caller
//! - the `current` flag, cleared by [`BuildEngine::mark_all_stale`]
//!
//! Checking an entry and installing a new build happen under one
//! synchronous lock with no await in between, so a function never has two
//! builds in flight.

use crate::compiler::{find_artifact, Compiler, CompilerContext};
use crate::error::BuildError;
use crate::options::{resolve_format, BuildOptions};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tether_core::{FunctionCatalog, FunctionDescriptor, FunctionId, ModuleFormat, TetherConfig};

type ContextSlot = Arc<tokio::sync::Mutex<Option<Box<dyn CompilerContext>>>>;
type PendingBuild = Shared<BoxFuture<'static, Result<PathBuf, BuildError>>>;

struct BuildEntry {
    context: ContextSlot,
    pending: PendingBuild,
    current: bool,
    generation: u64,
}

/// Build engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Builds started
    pub builds: u64,
    /// Compiler contexts created
    pub contexts_created: u64,
    /// Requests answered by an existing build
    pub cache_hits: u64,
}

#[derive(Default)]
struct Counters {
    builds: AtomicU64,
    contexts_created: AtomicU64,
    cache_hits: AtomicU64,
}

/// Incremental build cache
pub struct BuildEngine {
    catalog: FunctionCatalog,
    compiler: Arc<dyn Compiler>,
    project_root: PathBuf,
    output_dir: PathBuf,
    verbose: bool,
    entries: Mutex<HashMap<FunctionId, BuildEntry>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for BuildEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEngine")
            .field("project_root", &self.project_root)
            .field("output_dir", &self.output_dir)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl BuildEngine {
    /// Create an engine building under `{project_root}/{output_dir}`
    #[must_use]
    pub fn new(catalog: FunctionCatalog, compiler: Arc<dyn Compiler>, config: &TetherConfig) -> Self {
        Self {
            catalog,
            compiler,
            project_root: config.resolved_project_root(),
            output_dir: config.output_dir.clone(),
            verbose: config.verbose,
            entries: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Directory receiving one function's artifact
    #[must_use]
    pub fn artifact_dir(&self, function_id: &FunctionId) -> PathBuf {
        self.project_root
            .join(&self.output_dir)
            .join("artifacts")
            .join(function_id.as_str())
    }

    /// Path of a runnable artifact for the function, building it if needed
    ///
    /// Directly executable sources are returned as they are. Otherwise a
    /// current cached build is reused; a stale or missing one triggers a
    /// rebuild that reuses the previous compiler context.
    ///
    /// # Errors
    /// - `BuildError::FunctionNotFound` if the function is not in the catalog
    /// - any error of the build itself
    pub async fn get_artifact(&self, function_id: &FunctionId) -> Result<PathBuf, BuildError> {
        let descriptor = self
            .catalog
            .get(function_id)
            .map_err(|_| BuildError::FunctionNotFound(function_id.clone()))?;

        if descriptor.is_directly_executable() {
            return Ok(self.project_root.join(&descriptor.code_path));
        }

        let (pending, generation) = self.pending_build(function_id, descriptor);
        let result = pending.await;

        if let Err(e) = &result {
            // failed builds must not stick; the next request retries
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(function_id) {
                if entry.generation == generation {
                    entry.current = false;
                }
            }
            tracing::error!(function_id = %function_id, error = %e, "Build failed");
        }
        result
    }

    fn pending_build(&self, function_id: &FunctionId, descriptor: FunctionDescriptor) -> (PendingBuild, u64) {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(function_id).filter(|e| e.current) {
            tracing::debug!(function_id = %function_id, "Using existing build");
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return (entry.pending.clone(), entry.generation);
        }

        tracing::debug!(function_id = %function_id, "No current build, building");
        let (context, generation) = match entries.get(function_id) {
            Some(entry) => (Arc::clone(&entry.context), entry.generation + 1),
            None => (Arc::new(tokio::sync::Mutex::new(None)), 0),
        };

        let job = BuildJob {
            function_id: function_id.clone(),
            descriptor,
            compiler: Arc::clone(&self.compiler),
            context: Arc::clone(&context),
            project_root: self.project_root.clone(),
            target_dir: self.artifact_dir(function_id),
            verbose: self.verbose,
            counters: Arc::clone(&self.counters),
        };
        self.counters.builds.fetch_add(1, Ordering::Relaxed);
        let pending = job.run().boxed().shared();

        entries.insert(
            function_id.clone(),
            BuildEntry {
                context,
                pending: pending.clone(),
                current: true,
                generation,
            },
        );
        (pending, generation)
    }

    /// Flag every cached build as outdated, keeping compiler contexts
    pub fn mark_all_stale(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.values_mut() {
            entry.current = false;
        }
        tracing::debug!(count = entries.len(), "Marked builds stale");
    }

    /// Whether the function has an up-to-date cached build
    #[must_use]
    pub fn is_current(&self, function_id: &FunctionId) -> bool {
        self.entries
            .lock()
            .get(function_id)
            .is_some_and(|entry| entry.current)
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> BuildStats {
        BuildStats {
            builds: self.counters.builds.load(Ordering::Relaxed),
            contexts_created: self.counters.contexts_created.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
        }
    }
}

struct BuildJob {
    function_id: FunctionId,
    descriptor: FunctionDescriptor,
    compiler: Arc<dyn Compiler>,
    context: ContextSlot,
    project_root: PathBuf,
    target_dir: PathBuf,
    verbose: bool,
    counters: Arc<Counters>,
}

impl BuildJob {
    async fn run(self) -> Result<PathBuf, BuildError> {
        recreate_dir(&self.target_dir).await?;

        let mut slot = self.context.lock().await;
        let context = match &mut *slot {
            Some(context) => context,
            empty => {
                let options = self.options().await?;
                if self.verbose {
                    tracing::debug!(
                        function_id = %self.function_id,
                        options = %serde_json::to_string_pretty(&options).unwrap_or_default(),
                        "Building {}",
                        self.descriptor.code_path.display()
                    );
                } else {
                    tracing::info!(
                        function_id = %self.function_id,
                        "Building {}",
                        self.descriptor.code_path.display()
                    );
                }
                let created = self.compiler.create_context(&self.function_id, &options).await?;
                self.counters.contexts_created.fetch_add(1, Ordering::Relaxed);
                empty.insert(created)
            }
        };

        let output = context.rebuild().await?;
        drop(slot);

        let artifact = find_artifact(&output, &self.project_root)
            .ok_or_else(|| BuildError::NoArtifact(self.function_id.clone()))?;

        if let Some(manifest) = &self.descriptor.package_manifest_path {
            let from = self.project_root.join(manifest);
            let to = self.target_dir.join("package.json");
            tokio::fs::copy(&from, &to)
                .await
                .map_err(|e| BuildError::io(&from, e))?;
        } else {
            tracing::debug!(function_id = %self.function_id, "No package manifest to copy");
        }

        tracing::debug!(function_id = %self.function_id, artifact = %artifact.display(), "Build complete");
        Ok(artifact)
    }

    async fn options(&self) -> Result<BuildOptions, BuildError> {
        let declared = match &self.descriptor.package_manifest_path {
            Some(path) => Some(read_manifest_format(&self.project_root.join(path)).await?),
            None => None,
        };
        let format = resolve_format(
            self.descriptor.bundling.format,
            declared,
            &self.descriptor.code_path,
        );
        tracing::debug!(function_id = %self.function_id, "Module type: {format}");

        let entry = self.project_root.join(&self.descriptor.code_path);
        Ok(BuildOptions::defaults(entry, &self.target_dir, format).merged_with(&self.descriptor.bundling))
    }
}

async fn recreate_dir(dir: &Path) -> Result<(), BuildError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(BuildError::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| BuildError::io(dir, e))
}

/// Module format declared by a package manifest's `type` field
///
/// # Errors
/// - `BuildError::Io` if the manifest cannot be read
/// - `BuildError::Manifest` if it is not JSON
pub async fn read_manifest_format(path: &Path) -> Result<ModuleFormat, BuildError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BuildError::io(path, e))?;
    let manifest: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| BuildError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(match manifest.get("type").and_then(serde_json::Value::as_str) {
        Some("module") => ModuleFormat::Esm,
        _ => ModuleFormat::CommonJs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manifest_type_module_is_esm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.json");
        std::fs::write(&path, r#"{"name":"x","type":"module"}"#).unwrap();
        assert_eq!(read_manifest_format(&path).await.unwrap(), ModuleFormat::Esm);

        std::fs::write(&path, r#"{"name":"x"}"#).unwrap();
        assert_eq!(read_manifest_format(&path).await.unwrap(), ModuleFormat::CommonJs);
    }

    #[tokio::test]
    async fn broken_manifest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.json");
        std::fs::write(&path, "{").unwrap();
        let err = read_manifest_format(&path).await.unwrap_err();
        assert!(matches!(err, BuildError::Manifest { .. }));
    }

    #[tokio::test]
    async fn recreate_dir_empties_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("artifacts/orders");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("old.js"), "stale").unwrap();

        recreate_dir(&target).await.unwrap();
        assert!(target.exists());
        assert!(!target.join("old.js").exists());
    }
}
