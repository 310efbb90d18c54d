//! Dispatcher behaviour against the in-memory broker

use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_build::{BuildEngine, CommandCompiler};
use tether_core::{
    DebuggerSession, FunctionCatalog, FunctionDescriptor, HandlerFailure, SessionId, TetherConfig,
    WorkerId,
};
use tether_dispatcher::prelude::*;
use tether_sandbox::{HandlerTable, SandboxError, SandboxPool, ThreadRuntime};
use tether_transport::{Connection, Envelope, EnvelopeKind, InvokeRequest, MemoryBroker, Routing};
use tokio::sync::Notify;

mock! {
    Pipeline {}

    #[async_trait]
    impl InvocationPipeline for Pipeline {
        async fn run(&self, request: InvokeRequest) -> Result<Value, DispatchError>;
    }
}

/// Pipeline that counts calls and holds each one until released
#[derive(Default)]
struct GatedPipeline {
    calls: AtomicUsize,
    gate: Notify,
}

#[async_trait]
impl InvocationPipeline for GatedPipeline {
    async fn run(&self, _request: InvokeRequest) -> Result<Value, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(json!("released"))
    }
}

fn blocking_session() -> DebuggerSession {
    DebuggerSession {
        session_id: SessionId::new("sess-1"),
        mirror: false,
        mirror_interval: Duration::ZERO,
    }
}

fn mirror_session(interval: Duration) -> DebuggerSession {
    DebuggerSession {
        session_id: SessionId::mirror(),
        mirror: true,
        mirror_interval: interval,
    }
}

fn invoke(function: &str, request_id: &str) -> Envelope {
    Envelope::Invoke(InvokeRequest {
        routing: Routing::new(WorkerId::new("w1"), request_id, function.into()),
        deadline: 30_000,
        event: json!({ "orderId": 42 }),
        context: json!({ "awsRequestId": request_id }),
        environment: BTreeMap::from([("STAGE".to_string(), "dev".to_string())]),
    })
}

async fn link(broker: &MemoryBroker) -> Connection {
    Connection::connect(broker.access().options()).await.unwrap()
}

fn kinds(envelopes: &[Envelope]) -> Vec<EnvelopeKind> {
    envelopes.iter().map(Envelope::kind).collect()
}

async fn wait_for_calls(pipeline: &GatedPipeline, expected: usize) {
    for _ in 0..100 {
        if pipeline.calls.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("pipeline never reached {expected} calls");
}

#[tokio::test]
async fn blocking_invoke_pings_then_succeeds() {
    let broker = MemoryBroker::new();
    let mut pipeline = MockPipeline::new();
    pipeline
        .expect_run()
        .times(1)
        .returning(|request| Ok(json!({ "handled": request.event })));
    let dispatcher = Dispatcher::new(blocking_session(), Arc::new(pipeline));

    dispatcher.dispatch(&link(&broker).await, invoke("orders", "req-1")).await.unwrap();

    let replies = broker.published_envelopes("sess-1/events/w1");
    assert_eq!(kinds(&replies), vec![EnvelopeKind::Ping, EnvelopeKind::Success]);
    match &replies[1] {
        Envelope::Success(success) => {
            assert_eq!(success.routing.request_id, "req-1");
            assert_eq!(success.body, json!({ "handled": { "orderId": 42 } }));
        }
        other => panic!("expected SUCCESS, got {other:?}"),
    }
    assert_eq!(dispatcher.stats().completed, 1);
}

#[tokio::test]
async fn failing_invocation_replies_with_error() {
    let broker = MemoryBroker::new();
    let mut pipeline = MockPipeline::new();
    pipeline.expect_run().returning(|_| {
        Err(DispatchError::Sandbox(SandboxError::Handler(
            HandlerFailure::new("TypeError", "cannot read id").with_trace("at handler"),
        )))
    });
    let dispatcher = Dispatcher::new(blocking_session(), Arc::new(pipeline));

    dispatcher.dispatch(&link(&broker).await, invoke("orders", "req-1")).await.unwrap();

    let replies = broker.published_envelopes("sess-1/events/w1");
    match replies.last() {
        Some(Envelope::Error(failure)) => {
            assert_eq!(failure.failure.error_type, "TypeError");
            assert_eq!(failure.failure.error_message, "cannot read id");
            assert_eq!(failure.failure.trace.as_deref(), Some("at handler"));
        }
        other => panic!("expected ERROR, got {other:?}"),
    }
    assert_eq!(dispatcher.stats().failed, 1);
}

#[tokio::test]
async fn mirror_mode_never_replies() {
    let broker = MemoryBroker::new();
    let mut pipeline = MockPipeline::new();
    pipeline.expect_run().times(1).returning(|_| Ok(json!("seen")));
    let dispatcher = Dispatcher::new(mirror_session(Duration::ZERO), Arc::new(pipeline));

    dispatcher.dispatch(&link(&broker).await, invoke("orders", "req-1")).await.unwrap();

    assert!(broker.published_envelopes("MIRROR_MODE/events/w1").is_empty());
    assert_eq!(dispatcher.processing_count(), 0);
}

#[tokio::test]
async fn non_invoke_messages_are_rejected() {
    let broker = MemoryBroker::new();
    let mut pipeline = MockPipeline::new();
    pipeline.expect_run().never();
    let dispatcher = Dispatcher::new(blocking_session(), Arc::new(pipeline));

    let ping = Envelope::ping(Routing::new("w1".into(), "req-1", "orders".into()));
    let err = dispatcher.dispatch(&link(&broker).await, ping).await.unwrap_err();

    assert!(matches!(err, DispatchError::UnexpectedEnvelope(EnvelopeKind::Ping)));
    assert!(broker.published_envelopes("sess-1/events/w1").is_empty());
}

#[tokio::test]
async fn overlapping_mirror_invocations_are_suppressed() {
    let broker = MemoryBroker::new();
    let pipeline = Arc::new(GatedPipeline::default());
    let dispatcher = Arc::new(Dispatcher::new(
        mirror_session(Duration::ZERO),
        Arc::clone(&pipeline) as Arc<dyn InvocationPipeline>,
    ));
    let link = link(&broker).await;

    let first = {
        let dispatcher = Arc::clone(&dispatcher);
        let link = link.clone();
        tokio::spawn(async move { dispatcher.dispatch(&link, invoke("orders", "req-1")).await })
    };
    wait_for_calls(&pipeline, 1).await;

    dispatcher.dispatch(&link, invoke("orders", "req-2")).await.unwrap();
    assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.stats().suppressed, 1);

    pipeline.gate.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(dispatcher.processing_count(), 0);

    let third = {
        let dispatcher = Arc::clone(&dispatcher);
        let link = link.clone();
        tokio::spawn(async move { dispatcher.dispatch(&link, invoke("orders", "req-3")).await })
    };
    wait_for_calls(&pipeline, 2).await;
    pipeline.gate.notify_one();
    third.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn mirror_claim_expires_after_interval() {
    let broker = MemoryBroker::new();
    let pipeline = Arc::new(GatedPipeline::default());
    let dispatcher = Arc::new(Dispatcher::new(
        mirror_session(Duration::from_millis(3000)),
        Arc::clone(&pipeline) as Arc<dyn InvocationPipeline>,
    ));
    let link = link(&broker).await;

    let spawn_dispatch = |request_id: &'static str| {
        let dispatcher = Arc::clone(&dispatcher);
        let link = link.clone();
        tokio::spawn(async move { dispatcher.dispatch(&link, invoke("orders", request_id)).await })
    };

    let _stuck = spawn_dispatch("req-1");
    wait_for_calls(&pipeline, 1).await;

    tokio::time::advance(Duration::from_millis(1000)).await;
    spawn_dispatch("req-2").await.unwrap().unwrap();
    assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(2500)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let _second = spawn_dispatch("req-3");
    wait_for_calls(&pipeline, 2).await;
}

#[tokio::test(start_paused = true)]
async fn expiry_of_finished_claim_keeps_the_next_one() {
    let broker = MemoryBroker::new();
    let pipeline = Arc::new(GatedPipeline::default());
    let dispatcher = Arc::new(Dispatcher::new(
        mirror_session(Duration::from_millis(3000)),
        Arc::clone(&pipeline) as Arc<dyn InvocationPipeline>,
    ));
    let link = link(&broker).await;

    let spawn_dispatch = |request_id: &'static str| {
        let dispatcher = Arc::clone(&dispatcher);
        let link = link.clone();
        tokio::spawn(async move { dispatcher.dispatch(&link, invoke("orders", request_id)).await })
    };

    let first = spawn_dispatch("req-1");
    wait_for_calls(&pipeline, 1).await;
    pipeline.gate.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(dispatcher.processing_count(), 0);

    tokio::time::advance(Duration::from_millis(1000)).await;
    let _running = spawn_dispatch("req-2");
    wait_for_calls(&pipeline, 2).await;

    // the first claim's timer fires while the second invocation still runs
    tokio::time::advance(Duration::from_millis(2500)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(dispatcher.processing_count(), 1);

    spawn_dispatch("req-3").await.unwrap().unwrap();
    assert_eq!(pipeline.calls.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.stats().suppressed, 1);
}

#[tokio::test]
async fn different_functions_run_concurrently_in_mirror_mode() {
    let broker = MemoryBroker::new();
    let pipeline = Arc::new(GatedPipeline::default());
    let dispatcher = Arc::new(Dispatcher::new(
        mirror_session(Duration::ZERO),
        Arc::clone(&pipeline) as Arc<dyn InvocationPipeline>,
    ));
    let link = link(&broker).await;

    for function in ["orders", "payments"] {
        let dispatcher = Arc::clone(&dispatcher);
        let link = link.clone();
        tokio::spawn(async move { dispatcher.dispatch(&link, invoke(function, "req")).await });
    }
    wait_for_calls(&pipeline, 2).await;
    assert_eq!(dispatcher.processing_count(), 2);
}

#[tokio::test]
async fn subscription_serves_forwarded_invocations() {
    let broker = MemoryBroker::new();
    let mut pipeline = MockPipeline::new();
    pipeline.expect_run().returning(|request| Ok(request.event));
    let dispatcher = Arc::new(Dispatcher::new(blocking_session(), Arc::new(pipeline)));
    let handle = dispatcher.connect(&broker.access()).await.unwrap();
    handle.connection().connected().await.unwrap();

    let cloud = link(&broker).await;
    cloud.publish(&invoke("orders", "req-1"), "sess-1/events").await.unwrap();

    for _ in 0..100 {
        if broker.published_envelopes("sess-1/events/w1").len() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    let replies = broker.published_envelopes("sess-1/events/w1");
    assert_eq!(kinds(&replies), vec![EnvelopeKind::Ping, EnvelopeKind::Success]);

    handle.close().await.unwrap();
}

fn local_pipeline(root: &std::path::Path) -> LocalPipeline {
    let catalog = FunctionCatalog::from_descriptors([FunctionDescriptor::new("orders", "src/orders.js")]);
    let config = TetherConfig::default().with_project_root(root);
    let build = Arc::new(BuildEngine::new(
        catalog.clone(),
        Arc::new(CommandCompiler::esbuild(root)),
        &config,
    ));
    let table = HandlerTable::new().with("orders.handler", |event: Value, ctx| async move {
        Ok(json!({ "event": event, "stage": ctx.env("STAGE"), "local": ctx.env("IS_LOCAL") }))
    });
    let sandboxes = Arc::new(SandboxPool::new(Arc::new(ThreadRuntime::new(table)), root));
    LocalPipeline::new(catalog, build, sandboxes)
}

#[tokio::test]
async fn local_pipeline_runs_handler_in_sandbox() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = local_pipeline(root.path());

    let Envelope::Invoke(request) = invoke("orders", "req-1") else {
        unreachable!()
    };
    let body = pipeline.run(request).await.unwrap();

    assert_eq!(body, json!({ "event": { "orderId": 42 }, "stage": "dev", "local": "true" }));
    assert_eq!(pipeline.sandboxes().live_count(), 1);
    assert_eq!(pipeline.build().stats().builds, 0);
}

#[tokio::test]
async fn local_pipeline_rejects_unknown_function() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = local_pipeline(root.path());

    let Envelope::Invoke(request) = invoke("billing", "req-1") else {
        unreachable!()
    };
    let err = pipeline.run(request).await.unwrap_err();
    assert_eq!(err.into_failure().error_type, "FunctionNotFound");
}
