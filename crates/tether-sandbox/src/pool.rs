//! Sandbox pool
//!
//! Maps each worker to at most one live sandbox:
//! - Lazy start on a worker's first invocation, reuse afterwards
//! - Deferred teardown of busy sandboxes on [`SandboxPool::stop_all`]
//! - Idle reclaim, on demand or by a background [`ReaperHandle`]
//! - Pool statistics

use crate::error::SandboxError;
use crate::runtime::{ExecutionContext, ExecutionRequest, ExecutionRuntime, StartSpec};
use crate::state::SandboxState;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{env, WorkerId};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sandboxes started
    pub started: usize,
    /// Invocations served by an existing sandbox
    pub reused: usize,
    /// Sandboxes torn down
    pub terminated: usize,
    /// Sandboxes currently live
    pub live: usize,
}

struct Lifecycle {
    state: SandboxState,
    last_used: Instant,
}

/// One running execution context bound to a worker
struct Sandbox {
    worker_id: WorkerId,
    lifecycle: Mutex<Lifecycle>,
    context: tokio::sync::Mutex<Box<dyn ExecutionContext>>,
}

impl Sandbox {
    fn state(&self) -> SandboxState {
        self.lifecycle.lock().state
    }
}

/// Pool of per-worker sandboxes
pub struct SandboxPool {
    runtime: Arc<dyn ExecutionRuntime>,
    project_root: PathBuf,
    sandboxes: DashMap<WorkerId, Arc<Sandbox>>,
    stats: Mutex<PoolStats>,
}

impl std::fmt::Debug for SandboxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxPool")
            .field("project_root", &self.project_root)
            .field("live", &self.sandboxes.len())
            .finish_non_exhaustive()
    }
}

impl SandboxPool {
    /// Create a pool starting contexts with `runtime`
    #[must_use]
    pub fn new(runtime: Arc<dyn ExecutionRuntime>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            project_root: project_root.into(),
            sandboxes: DashMap::new(),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Run one invocation in the worker's sandbox
    ///
    /// # Errors
    /// - `SandboxError::Handler` / `HandlerNotFound` when the handler fails
    /// - `SandboxError::WorkerBusy` if the worker's sandbox is mid-invocation
    /// - `SandboxError::Spawn` if a new context cannot be started
    pub async fn invoke(
        &self,
        worker_id: &WorkerId,
        request: ExecutionRequest,
    ) -> Result<Value, SandboxError> {
        let sandbox = self.acquire(worker_id, &request).await?;

        {
            let mut lifecycle = sandbox.lifecycle.lock();
            lifecycle.state = lifecycle.state.begin(worker_id)?;
        }

        let function_id = request.function_id.clone();
        let mut context = sandbox.context.lock().await;
        let result = context.invoke(request).await;
        let alive = context.is_alive();

        let next = {
            let mut lifecycle = sandbox.lifecycle.lock();
            lifecycle.last_used = Instant::now();
            lifecycle.state = if alive {
                lifecycle.state.finish()?
            } else {
                lifecycle.state.crash()
            };
            lifecycle.state
        };

        if next == SandboxState::Terminated {
            tracing::debug!(%function_id, %worker_id, "Terminating sandbox after response");
            context.terminate().await;
            drop(context);
            self.forget(&sandbox);
        }

        result.map_err(SandboxError::Handler)
    }

    async fn acquire(
        &self,
        worker_id: &WorkerId,
        request: &ExecutionRequest,
    ) -> Result<Arc<Sandbox>, SandboxError> {
        if let Some(existing) = self.sandboxes.get(worker_id).map(|e| Arc::clone(e.value())) {
            if existing.state() != SandboxState::Terminated {
                tracing::debug!(function_id = %request.function_id, %worker_id, "Reusing sandbox");
                self.stats.lock().reused += 1;
                return Ok(existing);
            }
            self.forget(&existing);
        }

        let mut environment = request.environment.clone();
        environment.insert(env::IS_LOCAL.to_string(), "true".to_string());
        environment.insert(
            env::LOCAL_PROJECT_DIR.to_string(),
            self.project_root.display().to_string(),
        );

        tracing::debug!(function_id = %request.function_id, %worker_id, "Starting sandbox");
        let context = self
            .runtime
            .start(StartSpec {
                worker_id: worker_id.clone(),
                function_id: request.function_id.clone(),
                environment,
            })
            .await?;

        let sandbox = Arc::new(Sandbox {
            worker_id: worker_id.clone(),
            lifecycle: Mutex::new(Lifecycle {
                state: SandboxState::Idle,
                last_used: Instant::now(),
            }),
            context: tokio::sync::Mutex::new(context),
        });
        let installed = Arc::clone(
            self.sandboxes
                .entry(worker_id.clone())
                .or_insert_with(|| Arc::clone(&sandbox))
                .value(),
        );

        if Arc::ptr_eq(&installed, &sandbox) {
            let mut stats = self.stats.lock();
            stats.started += 1;
            stats.live = self.sandboxes.len();
        } else {
            sandbox.context.lock().await.terminate().await;
        }
        Ok(installed)
    }

    /// Tear down every sandbox; busy ones finish their invocation first
    pub async fn stop_all(&self) {
        tracing::debug!("Stopping all sandboxes");
        let sandboxes: Vec<Arc<Sandbox>> = self.sandboxes.iter().map(|e| Arc::clone(e.value())).collect();
        for sandbox in sandboxes {
            self.kill(&sandbox).await;
        }
    }

    /// Tear down sandboxes idle for longer than `max_idle`
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let idle: Vec<Arc<Sandbox>> = self
            .sandboxes
            .iter()
            .filter(|e| {
                let lifecycle = e.value().lifecycle.lock();
                lifecycle.state == SandboxState::Idle && lifecycle.last_used.elapsed() > max_idle
            })
            .map(|e| Arc::clone(e.value()))
            .collect();

        let count = idle.len();
        for sandbox in idle {
            tracing::debug!(worker_id = %sandbox.worker_id, "Reclaiming idle sandbox");
            self.kill(&sandbox).await;
        }
        count
    }

    /// Reclaim sandboxes idle longer than `max_idle` until the handle is dropped
    ///
    /// The pool is checked every half `max_idle`; the task ends on its own
    /// once the pool is gone.
    #[must_use]
    pub fn spawn_reaper(self: &Arc<Self>, max_idle: Duration) -> ReaperHandle {
        let pool = Arc::downgrade(self);
        let period = (max_idle / 2).max(Duration::from_millis(10));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let reclaimed = pool.reap_idle(max_idle).await;
                if reclaimed > 0 {
                    tracing::debug!(reclaimed, "Idle sandboxes reclaimed");
                }
            }
        });
        ReaperHandle { task }
    }

    async fn kill(&self, sandbox: &Arc<Sandbox>) {
        let next = {
            let mut lifecycle = sandbox.lifecycle.lock();
            let was = lifecycle.state;
            lifecycle.state = was.request_kill();
            (was, lifecycle.state)
        };

        match next {
            (SandboxState::Idle, SandboxState::Terminated) => {
                sandbox.context.lock().await.terminate().await;
                self.forget(sandbox);
            }
            (_, SandboxState::BusyPendingKill) => {
                tracing::debug!(worker_id = %sandbox.worker_id, "Sandbox busy, termination deferred");
            }
            _ => {}
        }
    }

    fn forget(&self, sandbox: &Arc<Sandbox>) {
        let removed = self
            .sandboxes
            .remove_if(&sandbox.worker_id, |_, current| Arc::ptr_eq(current, sandbox))
            .is_some();
        if removed {
            let mut stats = self.stats.lock();
            stats.terminated += 1;
            stats.live = self.sandboxes.len();
        }
    }

    /// State of a worker's sandbox, if one exists
    #[must_use]
    pub fn state_of(&self, worker_id: &WorkerId) -> Option<SandboxState> {
        self.sandboxes.get(worker_id).map(|e| e.value().state())
    }

    /// Number of live sandboxes
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.sandboxes.len()
    }

    /// Pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = *self.stats.lock();
        stats.live = self.sandboxes.len();
        stats
    }
}

/// Background idle reclaim; stops when dropped
#[derive(Debug)]
pub struct ReaperHandle {
    task: JoinHandle<()>,
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
