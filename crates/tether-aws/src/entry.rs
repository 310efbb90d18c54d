//! Function entry point
//!
//! [`serve`] is the `main` of a function compiled with its handlers. When the
//! bridge is attached the [`Interceptor`] serves every invocation; otherwise
//! the handler named by `_HANDLER` runs directly, so the same binary works
//! with and without the bridge.
//!
//! The bridge layer's wrapper script records the configured handler in
//! `TETHER_ORIGINAL_HANDLER` before the runtime starts.

use crate::config::{AwsServices, AwsSettings};
use crate::error::AwsError;
use lambda_runtime::{service_fn, Context, Diagnostic, LambdaEvent};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tether_core::{env, telemetry, HandlerFailure};
use tether_interceptor::{
    HandlerRegistry, Interceptor, InterceptorConfig, InterceptorError, PlatformInvocation, RealHandler,
};

/// Variable the platform sets to the configured handler
pub const PLATFORM_HANDLER: &str = "_HANDLER";

fn diagnostic(failure: HandlerFailure) -> Diagnostic {
    Diagnostic {
        error_type: failure.error_type,
        error_message: failure.error_message,
    }
}

/// Serialisable part of the platform context
fn context_json(context: &Context) -> Value {
    json!({
        "awsRequestId": context.request_id,
        "invokedFunctionArn": context.invoked_function_arn,
        "functionName": context.env_config.function_name,
        "functionVersion": context.env_config.version,
        "memoryLimitInMB": context.env_config.memory,
        "logGroupName": context.env_config.log_group,
        "logStreamName": context.env_config.log_stream,
    })
}

/// Milliseconds until `deadline_ms` (epoch milliseconds), never negative
fn remaining_millis(deadline_ms: u64, now: SystemTime) -> i64 {
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    i64::try_from(deadline_ms.saturating_sub(now_ms)).unwrap_or(i64::MAX)
}

fn invocation(event: LambdaEvent<Value>) -> PlatformInvocation {
    let remaining = remaining_millis(event.context.deadline, SystemTime::now());
    PlatformInvocation::new(event.context.request_id.clone(), event.payload)
        .with_remaining_millis(remaining)
        .with_context(context_json(&event.context))
        .with_environment(std::env::vars().collect())
}

/// How invocations are served in this execution environment
enum Entry {
    Intercepted(Interceptor),
    Direct(Arc<dyn RealHandler>),
}

impl Entry {
    async fn start(handlers: &HandlerRegistry) -> Result<Self, AwsError> {
        telemetry::init_tracing(env::flag(std::env::var(env::VERBOSE).ok().as_deref()));
        let config = match InterceptorConfig::from_env() {
            Ok(config) => config,
            Err(InterceptorError::MissingVariable(name)) if name == env::FUNCTION_ID => {
                let name = std::env::var(PLATFORM_HANDLER)
                    .map_err(|_| InterceptorError::MissingVariable(PLATFORM_HANDLER))?;
                tracing::debug!(handler = %name, "Bridge not attached, serving directly");
                return Ok(Self::Direct(handlers.get(&name)?));
            }
            Err(e) => return Err(e.into()),
        };

        let services = AwsServices::load(&AwsSettings::default()).await?;
        let access = services.broker_access()?;
        Ok(Self::Intercepted(Interceptor::cold_start(&config, &access, handlers).await?))
    }

    async fn handle(&self, event: LambdaEvent<Value>) -> Result<Value, Diagnostic> {
        match self {
            Self::Intercepted(interceptor) => interceptor
                .handle(invocation(event))
                .await
                .map_err(|e| diagnostic(e.into_failure())),
            Self::Direct(handler) => {
                let context = context_json(&event.context);
                handler.call(event.payload, context).await.map_err(diagnostic)
            }
        }
    }
}

/// Serve invocations until the runtime shuts the environment down
///
/// # Errors
/// - `AwsError::Entry` if the interceptor or the direct handler cannot start
/// - `AwsError::NoRegion` / `NoCredentials` if the broker is unreachable
/// - the runtime's error if the invocation loop fails
pub async fn serve(handlers: HandlerRegistry) -> Result<(), lambda_runtime::Error> {
    let entry = Arc::new(Entry::start(&handlers).await?);
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let entry = Arc::clone(&entry);
        async move { entry.handle(event).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn remaining_time_counts_down_to_the_deadline() {
        let now = UNIX_EPOCH + Duration::from_millis(1_000_000);
        assert_eq!(remaining_millis(1_002_500, now), 2_500);
        assert_eq!(remaining_millis(999_000, now), 0);
    }

    #[test]
    fn failures_keep_their_type() {
        let diagnostic = diagnostic(HandlerFailure::new("TypeError", "bad input"));
        assert_eq!(diagnostic.error_type, "TypeError");
        assert_eq!(diagnostic.error_message, "bad input");
    }

    #[test]
    fn context_carries_the_request_id() {
        let mut context = Context::default();
        context.request_id = "req-1".into();
        context.invoked_function_arn = "arn:aws:lambda:eu-west-1:1:function:orders".into();

        let value = context_json(&context);
        assert_eq!(value["awsRequestId"], "req-1");
        assert_eq!(value["invokedFunctionArn"], "arn:aws:lambda:eu-west-1:1:function:orders");
    }
}
