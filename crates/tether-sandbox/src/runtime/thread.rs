//! Thread runtime
//!
//! Each context owns a dedicated OS thread with its own single-threaded
//! async runtime, so CPU-bound handlers never block the dispatcher. Handlers
//! come from an explicit [`HandlerTable`] keyed by `module.export`, the form
//! of a platform handler string such as `orders.handler`.

use super::{crashed, ExecutionContext, ExecutionRequest, ExecutionRuntime, StartSpec};
use crate::context::InvocationContext;
use crate::error::SandboxError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tether_core::HandlerFailure;
use tokio::sync::{mpsc, oneshot};

/// A registered handler
pub type Handler =
    Arc<dyn Fn(Value, InvocationContext) -> BoxFuture<'static, Result<Value, HandlerFailure>> + Send + Sync>;

/// Function table resolving handlers by module and export name
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl HandlerTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `module.export`
    #[must_use]
    pub fn with<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerFailure>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |event, ctx| handler(event, ctx).boxed()));
        self
    }

    /// Find the handler exported as `export` by the module behind `artifact`
    ///
    /// # Errors
    /// - `SandboxError::HandlerNotFound` if the table has no such entry
    pub fn resolve(&self, artifact: &Path, export: &str) -> Result<Handler, SandboxError> {
        let module = artifact
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        self.handlers
            .get(&format!("{module}.{export}"))
            .cloned()
            .ok_or_else(|| SandboxError::HandlerNotFound {
                module: artifact.display().to_string(),
                handler: export.to_string(),
            })
    }

    /// Number of registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Runtime running handlers on dedicated threads
#[derive(Debug, Clone)]
pub struct ThreadRuntime {
    table: Arc<HandlerTable>,
}

impl ThreadRuntime {
    /// Create a runtime serving handlers from `table`
    #[must_use]
    pub fn new(table: HandlerTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }
}

#[async_trait::async_trait]
impl ExecutionRuntime for ThreadRuntime {
    async fn start(&self, spec: StartSpec) -> Result<Box<dyn ExecutionContext>, SandboxError> {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let table = Arc::clone(&self.table);
        let base_env = spec.environment;

        std::thread::Builder::new()
            .name(format!("tether-sandbox-{}", spec.worker_id))
            .spawn(move || serve(&table, &base_env, rx))
            .map_err(|e| SandboxError::Spawn(e.to_string()))?;

        tracing::debug!(worker_id = %spec.worker_id, function_id = %spec.function_id, "Started sandbox thread");
        Ok(Box::new(ThreadContext { jobs: Some(tx) }))
    }
}

struct Job {
    request: ExecutionRequest,
    reply: oneshot::Sender<Result<Value, HandlerFailure>>,
}

fn serve(table: &HandlerTable, base_env: &BTreeMap<String, String>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Sandbox runtime failed to start");
            return;
        }
    };

    runtime.block_on(async {
        while let Some(job) = jobs.recv().await {
            let result = run_job(table, base_env, job.request).await;
            let _ = job.reply.send(result);
        }
    });
}

async fn run_job(
    table: &HandlerTable,
    base_env: &BTreeMap<String, String>,
    request: ExecutionRequest,
) -> Result<Value, HandlerFailure> {
    let handler = table
        .resolve(&request.artifact, &request.handler)
        .map_err(SandboxError::into_failure)?;

    let mut environment = base_env.clone();
    environment.extend(request.environment);
    let ctx = InvocationContext::new(request.context, environment);

    let started = std::panic::catch_unwind(AssertUnwindSafe(|| handler(request.event, ctx)))
        .map_err(|panic| panic_failure(&*panic))?;
    AssertUnwindSafe(started)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panic_failure(&*panic)))
}

fn panic_failure(panic: &(dyn std::any::Any + Send)) -> HandlerFailure {
    let message = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    HandlerFailure::new("Panic", message)
}

struct ThreadContext {
    jobs: Option<mpsc::UnboundedSender<Job>>,
}

#[async_trait::async_trait]
impl ExecutionContext for ThreadContext {
    async fn invoke(&mut self, request: ExecutionRequest) -> Result<Value, HandlerFailure> {
        let jobs = self.jobs.as_ref().ok_or_else(|| crashed("terminated"))?;
        let (reply, response) = oneshot::channel();
        if jobs.send(Job { request, reply }).is_err() {
            self.jobs = None;
            return Err(crashed("sandbox thread exited"));
        }
        match response.await {
            Ok(result) => result,
            Err(_) => {
                self.jobs = None;
                Err(crashed("sandbox thread dropped the invocation"))
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.jobs.as_ref().is_some_and(|jobs| !jobs.is_closed())
    }

    async fn terminate(&mut self) {
        // closing the queue ends the thread once its current job is done
        self.jobs = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::{FunctionId, WorkerId};

    fn request(handler: &str, event: Value) -> ExecutionRequest {
        ExecutionRequest {
            function_id: FunctionId::new("orders"),
            artifact: "/work/.tether/artifacts/orders/orders.js".into(),
            handler: handler.to_string(),
            environment: BTreeMap::from([("STAGE".to_string(), "dev".to_string())]),
            event,
            context: json!({ "awsRequestId": "req-1" }),
        }
    }

    fn spec() -> StartSpec {
        StartSpec {
            worker_id: WorkerId::new("w1"),
            function_id: FunctionId::new("orders"),
            environment: BTreeMap::from([("IS_LOCAL".to_string(), "true".to_string())]),
        }
    }

    fn table() -> HandlerTable {
        HandlerTable::new()
            .with("orders.handler", |event, ctx| async move {
                Ok(json!({
                    "echo": event,
                    "local": ctx.env("IS_LOCAL"),
                    "stage": ctx.env("STAGE"),
                    "requestId": ctx.request_id(),
                }))
            })
            .with("orders.explode", |event: Value, _| async move {
                assert!(event.is_object(), "kaboom");
                Ok(event)
            })
            .with("orders.reject", |_, _| async move {
                Err(HandlerFailure::new("ValidationError", "missing id"))
            })
    }

    #[tokio::test]
    async fn runs_registered_handler_with_merged_env() {
        let runtime = ThreadRuntime::new(table());
        let mut ctx = runtime.start(spec()).await.unwrap();

        let value = ctx.invoke(request("handler", json!({ "id": 1 }))).await.unwrap();
        assert_eq!(
            value,
            json!({ "echo": { "id": 1 }, "local": "true", "stage": "dev", "requestId": "req-1" })
        );
        assert!(ctx.is_alive());
    }

    #[tokio::test]
    async fn missing_export_is_typed_failure() {
        let runtime = ThreadRuntime::new(table());
        let mut ctx = runtime.start(spec()).await.unwrap();

        let failure = ctx.invoke(request("main", json!(null))).await.unwrap_err();
        assert_eq!(failure.error_type, "HandlerNotFound");
        assert!(ctx.is_alive());
    }

    #[tokio::test]
    async fn panic_becomes_structured_failure() {
        let runtime = ThreadRuntime::new(table());
        let mut ctx = runtime.start(spec()).await.unwrap();

        let failure = ctx.invoke(request("explode", json!(null))).await.unwrap_err();
        assert_eq!(failure.error_type, "Panic");
        assert_eq!(failure.error_message, "kaboom");

        let again = ctx.invoke(request("reject", json!(null))).await.unwrap_err();
        assert_eq!(again.error_type, "ValidationError");
    }

    #[tokio::test]
    async fn terminated_context_refuses_work() {
        let runtime = ThreadRuntime::new(table());
        let mut ctx = runtime.start(spec()).await.unwrap();
        ctx.terminate().await;

        assert!(!ctx.is_alive());
        let failure = ctx.invoke(request("handler", json!(null))).await.unwrap_err();
        assert_eq!(failure.error_type, "SandboxCrashed");
    }
}
