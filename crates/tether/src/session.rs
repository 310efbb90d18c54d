//! Live debugging session
//!
//! Wires the developer machine into the cloud for one run:
//! 1. reconcile the cloud so every in-scope function carries the bridge
//! 2. watch the sources so edits take effect on the next invocation
//! 3. connect the dispatcher to the session's events topic
//!
//! While running, sandboxes left idle past `idle_reclaim_ms` are torn down.
//!
//! Removal undoes step 1, optionally deleting the bridge layer itself.

use crate::error::SessionError;
use crate::watcher::{watch_root, DiscoverySource, SourceWatcher, WatchHandle};
use anyhow::Context;
use std::sync::Arc;
use tether_build::{BuildEngine, Compiler};
use tether_core::{DebuggerSession, FunctionCatalog, TetherConfig};
use tether_dispatcher::{Dispatcher, DispatcherHandle, LocalPipeline};
use tether_infra::{ApplyReport, CloudApi, ReconcileSettings, Reconciler};
use tether_sandbox::{ExecutionRuntime, ReaperHandle, SandboxPool};
use tether_transport::BrokerAccess;

/// External collaborators of a session
#[derive(Clone)]
pub struct SessionParts {
    /// Cloud management API
    pub cloud: Arc<dyn CloudApi>,
    /// Broker the interceptors talk to
    pub broker: BrokerAccess,
    /// Compiler for functions that need bundling
    pub compiler: Arc<dyn Compiler>,
    /// Runtime starting sandboxes
    pub runtime: Arc<dyn ExecutionRuntime>,
    /// Rediscovery on source change
    pub discovery: Option<Arc<dyn DiscoverySource>>,
}

impl std::fmt::Debug for SessionParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParts")
            .field("discovery", &self.discovery.is_some())
            .finish_non_exhaustive()
    }
}

/// One local debugging run
pub struct LiveSession {
    config: TetherConfig,
    session: DebuggerSession,
    catalog: FunctionCatalog,
    build: Arc<BuildEngine>,
    sandboxes: Arc<SandboxPool>,
    dispatcher: Arc<Dispatcher>,
    reconciler: Reconciler,
    broker: BrokerAccess,
    discovery: Option<Arc<dyn DiscoverySource>>,
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("session", &self.session)
            .field("functions", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl LiveSession {
    /// Assemble a session over the discovered catalog
    #[must_use]
    pub fn new(
        config: TetherConfig,
        session: DebuggerSession,
        catalog: FunctionCatalog,
        parts: SessionParts,
    ) -> Self {
        let build = Arc::new(BuildEngine::new(catalog.clone(), parts.compiler, &config));
        let sandboxes = Arc::new(SandboxPool::new(parts.runtime, config.resolved_project_root()));
        let pipeline = Arc::new(LocalPipeline::new(
            catalog.clone(),
            Arc::clone(&build),
            Arc::clone(&sandboxes),
        ));
        let dispatcher = Arc::new(Dispatcher::new(session.clone(), pipeline).with_verbose(config.verbose));
        let reconciler = Reconciler::new(
            parts.cloud,
            catalog.clone(),
            ReconcileSettings::from_config(&config, &session),
        );

        Self {
            config,
            session,
            catalog,
            build,
            sandboxes,
            dispatcher,
            reconciler,
            broker: parts.broker,
            discovery: parts.discovery,
        }
    }

    /// Session identity
    #[inline]
    #[must_use]
    pub fn session(&self) -> &DebuggerSession {
        &self.session
    }

    /// Discovered functions
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }

    /// Build cache
    #[inline]
    #[must_use]
    pub fn build(&self) -> &Arc<BuildEngine> {
        &self.build
    }

    /// Sandbox pool
    #[inline]
    #[must_use]
    pub fn sandboxes(&self) -> &Arc<SandboxPool> {
        &self.sandboxes
    }

    /// Dispatcher serving the session
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Reconciler of the session
    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Wire the cloud, start watching and begin serving invocations
    ///
    /// A failed reconciliation step is logged and reported; functions that
    /// were wired still get served.
    ///
    /// # Errors
    /// - no function was discovered
    /// - the layer version lookup failed
    /// - file notifications could not be set up
    /// - the broker could not be reached
    pub async fn start(&self) -> anyhow::Result<RunningSession> {
        if self.catalog.is_empty() {
            if let Some(discovery) = &self.discovery {
                match discovery.discover().await {
                    Ok(functions) => {
                        self.catalog.replace(functions);
                    }
                    Err(e) => tracing::warn!(error = %e, "Discovery failed"),
                }
            }
        }
        if self.catalog.is_empty() {
            return Err(SessionError::NoFunctions.into());
        }

        tracing::info!(
            session_id = %self.session.session_id,
            mirror = self.session.mirror,
            "Starting debugging session"
        );

        let plan = self
            .reconciler
            .plan_add()
            .await
            .context("planning function wiring")?;
        for unreadable in &plan.unreadable {
            tracing::warn!(object = %unreadable.target, message = %unreadable.message, "Skipped");
        }
        let report = self.reconciler.apply(&plan).await;
        if !report.is_success() {
            tracing::warn!(failed = report.failures.len(), "Some functions could not be wired");
        }

        let watcher = if self.config.watch.enabled {
            Some(self.watch().context("watching sources")?)
        } else {
            None
        };
        let reaper = self
            .config
            .idle_reclaim()
            .map(|max_idle| self.sandboxes.spawn_reaper(max_idle));

        let dispatcher = self
            .dispatcher
            .connect(&self.broker)
            .await
            .context("connecting to the broker")?;
        tracing::info!("Debugger ready, waiting for invocations");

        Ok(RunningSession {
            report,
            dispatcher,
            watcher,
            reaper,
            sandboxes: Arc::clone(&self.sandboxes),
        })
    }

    fn watch(&self) -> Result<WatchHandle, SessionError> {
        let root = watch_root(&self.config.resolved_project_root(), &self.catalog.all());
        let mut watcher = SourceWatcher::new(
            root,
            &self.config.watch,
            self.catalog.clone(),
            Arc::clone(&self.build),
            Arc::clone(&self.sandboxes),
        )
        .excluding(self.config.resolved_output_dir());
        if let Some(discovery) = &self.discovery {
            watcher = watcher.with_discovery(Arc::clone(discovery));
        }
        Arc::new(watcher).spawn()
    }

    /// Remove the bridge from every discovered function
    ///
    /// # Errors
    /// - planning the removal failed
    pub async fn remove(&self) -> anyhow::Result<ApplyReport> {
        let plan = self
            .reconciler
            .plan_remove()
            .await
            .context("planning bridge removal")?;
        let report = self.reconciler.apply(&plan).await;
        tracing::info!(
            detached = report.detached.len(),
            revoked = report.revoked.len(),
            "Bridge removed"
        );
        Ok(report)
    }

    /// Remove the bridge and delete every version of its layer
    ///
    /// The layer is kept when a function could not be detached, since it
    /// may still reference it.
    ///
    /// # Errors
    /// - planning the removal or deleting the layer failed
    pub async fn remove_all(&self) -> anyhow::Result<(ApplyReport, usize)> {
        let report = self.remove().await?;
        if !report.is_success() {
            tracing::warn!("Keeping the bridge layer, some functions are still wired");
            return Ok((report, 0));
        }
        let deleted = self
            .reconciler
            .purge_layer()
            .await
            .context("deleting the bridge layer")?;
        Ok((report, deleted))
    }
}

/// A started session
#[derive(Debug)]
pub struct RunningSession {
    report: ApplyReport,
    dispatcher: DispatcherHandle,
    watcher: Option<WatchHandle>,
    reaper: Option<ReaperHandle>,
    sandboxes: Arc<SandboxPool>,
}

impl RunningSession {
    /// Outcome of the wiring done at start
    #[inline]
    #[must_use]
    pub fn report(&self) -> &ApplyReport {
        &self.report
    }

    /// Dispatcher subscription
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    /// Source watcher, if watching is enabled
    #[inline]
    #[must_use]
    pub fn watcher(&self) -> Option<&WatchHandle> {
        self.watcher.as_ref()
    }

    /// Stop serving; the cloud wiring stays in place
    ///
    /// # Errors
    /// - closing the broker connection failed
    pub async fn stop(self) -> anyhow::Result<()> {
        drop(self.watcher);
        drop(self.reaper);
        self.dispatcher
            .close()
            .await
            .context("closing the broker connection")?;
        self.sandboxes.stop_all().await;
        tracing::info!("Debugging session stopped");
        Ok(())
    }
}
