//! Interceptor behaviour against the in-memory broker

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tether_core::{HandlerFailure, SessionId};
use tether_interceptor::prelude::*;
use tether_interceptor::DEGRADED_MESSAGE;
use tether_transport::{Connection, Envelope, InvokeRequest, MemoryBroker};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn session() -> SessionId {
    SessionId::new("sess-1")
}

fn blocking_config() -> InterceptorConfig {
    InterceptorConfig::new("orders".into(), session())
}

/// Stand-in for the local dispatcher: answers every INVOKE with `respond`
async fn developer_machine<F, Fut>(broker: &MemoryBroker, respond: F) -> JoinHandle<()>
where
    F: Fn(Connection, InvokeRequest) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = Connection::connect(
        broker
            .access()
            .options()
            .with_topic(session().events_topic())
            .with_inbox(tx),
    )
    .await
    .unwrap();
    connection.connected().await.unwrap();

    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Envelope::Invoke(request) = envelope {
                respond(connection.clone(), request).await;
            }
        }
    })
}

fn reply_topic(request: &InvokeRequest) -> String {
    session().worker_topic(&request.routing.worker_id)
}

#[tokio::test]
async fn blocking_call_returns_local_result() {
    let broker = MemoryBroker::new();
    let _machine = developer_machine(&broker, |connection, request| async move {
        let topic = reply_topic(&request);
        connection.publish(&Envelope::ping(request.routing.clone()), &topic).await.unwrap();
        let body = json!({ "echo": request.event, "deadline": request.deadline });
        connection
            .publish(&Envelope::success(request.routing, body), &topic)
            .await
            .unwrap();
    })
    .await;

    let interceptor = Interceptor::cold_start(&blocking_config(), &broker.access(), &HandlerRegistry::new())
        .await
        .unwrap();
    assert_eq!(interceptor.mode(), "blocking");

    let body = interceptor
        .handle(PlatformInvocation::new("req-1", json!({ "n": 1 })).with_remaining_millis(900))
        .await
        .unwrap();
    assert_eq!(body, json!({ "echo": { "n": 1 }, "deadline": 900 }));
}

#[tokio::test]
async fn blocking_call_surfaces_remote_failure() {
    let broker = MemoryBroker::new();
    let _machine = developer_machine(&broker, |connection, request| async move {
        let topic = reply_topic(&request);
        let failure = HandlerFailure::new("TypeError", "x is undefined").with_trace("at handler (index.js:3)");
        connection
            .publish(&Envelope::failure(request.routing, failure), &topic)
            .await
            .unwrap();
    })
    .await;

    let interceptor = Interceptor::cold_start(&blocking_config(), &broker.access(), &HandlerRegistry::new())
        .await
        .unwrap();

    let err = interceptor
        .handle(PlatformInvocation::new("req-1", json!({})))
        .await
        .unwrap_err();
    let failure = err.into_failure();
    assert_eq!(failure.error_type, "TypeError");
    assert_eq!(failure.error_message, "x is undefined");
    assert_eq!(failure.trace.as_deref(), Some("at handler (index.js:3)"));
}

#[tokio::test(start_paused = true)]
async fn silent_developer_machine_yields_degraded_response() {
    let broker = MemoryBroker::new();
    let interceptor = Interceptor::cold_start(&blocking_config(), &broker.access(), &HandlerRegistry::new())
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let body = interceptor
        .handle(PlatformInvocation::new("req-1", json!({})))
        .await
        .unwrap();

    assert_eq!(body, json!({ "statusCode": 500, "body": DEGRADED_MESSAGE }));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    assert_eq!(broker.published_envelopes(&session().events_topic()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn ping_keeps_call_waiting_past_fallback() {
    let broker = MemoryBroker::new();
    let _machine = developer_machine(&broker, |connection, request| async move {
        let topic = reply_topic(&request);
        connection.publish(&Envelope::ping(request.routing.clone()), &topic).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        connection
            .publish(&Envelope::success(request.routing, json!("slow but real")), &topic)
            .await
            .unwrap();
    })
    .await;

    let interceptor = Interceptor::cold_start(&blocking_config(), &broker.access(), &HandlerRegistry::new())
        .await
        .unwrap();

    let body = interceptor
        .handle(PlatformInvocation::new("req-1", json!({})))
        .await
        .unwrap();
    assert_eq!(body, json!("slow but real"));
}

#[tokio::test(start_paused = true)]
async fn late_response_after_fallback_is_ignored() {
    let broker = MemoryBroker::new();
    let _machine = developer_machine(&broker, |connection, request| async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        let topic = reply_topic(&request);
        connection
            .publish(&Envelope::success(request.routing, json!("too late")), &topic)
            .await
            .unwrap();
    })
    .await;

    let interceptor = Interceptor::cold_start(&blocking_config(), &broker.access(), &HandlerRegistry::new())
        .await
        .unwrap();

    let first = interceptor
        .handle(PlatformInvocation::new("req-1", json!({})))
        .await
        .unwrap();
    assert_eq!(first["statusCode"], 500);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let second = interceptor
        .handle(PlatformInvocation::new("req-2", json!({})))
        .await
        .unwrap();
    assert_eq!(second["statusCode"], 500);
}

fn mirror_config(interval: Duration) -> InterceptorConfig {
    InterceptorConfig::new("orders".into(), SessionId::mirror())
        .with_mirror(interval)
        .with_original_handler("index.handler")
}

fn real_handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .with("index.handler", |event: Value, _| async move {
            if event["fail"] == true {
                return Err(HandlerFailure::new("Error", "real handler failed"));
            }
            Ok(json!({ "statusCode": 200, "body": event }))
        })
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn mirror_runs_real_handler_and_throttles_publishes() {
    let broker = MemoryBroker::new();
    let interceptor = Interceptor::cold_start(
        &mirror_config(Duration::from_millis(3000)),
        &broker.access(),
        &real_handlers(),
    )
    .await
    .unwrap();
    assert_eq!(interceptor.mode(), "mirror");
    let topic = SessionId::mirror().events_topic();

    let body = interceptor
        .handle(PlatformInvocation::new("req-1", json!({ "n": 1 })))
        .await
        .unwrap();
    assert_eq!(body, json!({ "statusCode": 200, "body": { "n": 1 } }));
    settle().await;
    assert_eq!(broker.published_envelopes(&topic).len(), 1);

    tokio::time::advance(Duration::from_millis(1000)).await;
    interceptor
        .handle(PlatformInvocation::new("req-2", json!({ "n": 2 })))
        .await
        .unwrap();
    settle().await;
    assert_eq!(broker.published_envelopes(&topic).len(), 1);

    tokio::time::advance(Duration::from_millis(3000)).await;
    interceptor
        .handle(PlatformInvocation::new("req-3", json!({ "n": 3 })))
        .await
        .unwrap();
    settle().await;

    let published = broker.published_envelopes(&topic);
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].routing().request_id, "req-3");
}

#[tokio::test]
async fn mirror_returns_real_handler_failure() {
    let broker = MemoryBroker::new();
    let interceptor = Interceptor::cold_start(&mirror_config(Duration::ZERO), &broker.access(), &real_handlers())
        .await
        .unwrap();

    let err = interceptor
        .handle(PlatformInvocation::new("req-1", json!({ "fail": true })))
        .await
        .unwrap_err();
    assert_eq!(err.into_failure().error_message, "real handler failed");
}

#[tokio::test]
async fn mirror_survives_unreachable_broker() {
    let broker = MemoryBroker::new().without_endpoint();
    let interceptor = Interceptor::cold_start(&mirror_config(Duration::ZERO), &broker.access(), &real_handlers())
        .await
        .unwrap();

    let body = interceptor
        .handle(PlatformInvocation::new("req-1", json!("still served")))
        .await
        .unwrap();
    assert_eq!(body["body"], "still served");
}

#[tokio::test]
async fn mirror_requires_registered_handler() {
    let broker = MemoryBroker::new();
    let err = Interceptor::cold_start(
        &mirror_config(Duration::ZERO),
        &broker.access(),
        &HandlerRegistry::new(),
    )
    .await
    .unwrap_err();
    assert!(err.is_config_error());
}

#[tokio::test]
async fn blocking_cold_start_fails_without_endpoint() {
    let broker = MemoryBroker::new().without_endpoint();
    let err = Interceptor::cold_start(&blocking_config(), &broker.access(), &HandlerRegistry::new())
        .await
        .unwrap_err();
    assert!(matches!(err, InterceptorError::Transport(_)));
}
