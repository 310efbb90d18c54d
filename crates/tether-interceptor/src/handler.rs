//! Real handlers run by mirror mode
//!
//! The platform entry point is replaced by the interceptor, so the handler the
//! function was originally configured with has to be found again:
//! - its name comes from `TETHER_ORIGINAL_HANDLER`
//! - when another wrapper was configured before the bridge attached, that
//!   wrapper runs first with `_HANDLER` restored, and whatever `_HANDLER` it
//!   hands on is the handler to call
//! - the name is then looked up in a [`HandlerRegistry`]

use crate::config::InterceptorConfig;
use crate::error::InterceptorError;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tether_core::{env, HandlerFailure};
use tokio::process::Command;

/// The function's own handler
#[async_trait::async_trait]
pub trait RealHandler: Send + Sync {
    /// Run the handler on one invocation
    async fn call(&self, event: Value, context: Value) -> Result<Value, HandlerFailure>;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> RealHandler for FnHandler<F>
where
    F: Fn(Value, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerFailure>> + Send,
{
    async fn call(&self, event: Value, context: Value) -> Result<Value, HandlerFailure> {
        (self.0)(event, context).await
    }
}

/// Handlers compiled into the function, keyed by handler name
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RealHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

impl HandlerRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a closure registered under `name`
    #[must_use]
    pub fn with<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerFailure>> + Send + 'static,
    {
        self.with_handler(name, Arc::new(FnHandler(handler)))
    }

    /// With a handler object registered under `name`
    #[must_use]
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn RealHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Handler registered under `name`
    ///
    /// # Errors
    /// - `InterceptorError::HandlerNotFound` if nothing is registered
    pub fn get(&self, name: &str) -> Result<Arc<dyn RealHandler>, InterceptorError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| InterceptorError::HandlerNotFound(name.to_string()))
    }

    /// Number of registered handlers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Name of the handler the function was configured with
///
/// # Errors
/// - `InterceptorError::MissingVariable` if the original handler is unknown
/// - `InterceptorError::Wrapper` if the chained wrapper cannot be run
pub async fn resolve_original_handler(config: &InterceptorConfig) -> Result<String, InterceptorError> {
    let original = config
        .original_handler
        .clone()
        .ok_or(InterceptorError::MissingVariable(env::ORIGINAL_HANDLER))?;

    match &config.previous_wrapper {
        Some(wrapper) => handler_after_wrapper(wrapper, &original).await,
        None => Ok(original),
    }
}

/// Run a platform wrapper script and report the handler it passes on
///
/// Wrappers receive the runtime command as arguments and `exec` it after
/// adjusting the environment; the command it is handed prints `_HANDLER`.
async fn handler_after_wrapper(wrapper: &Path, original: &str) -> Result<String, InterceptorError> {
    tracing::debug!(wrapper = %wrapper.display(), original, "Running previous wrapper");
    let output = Command::new(wrapper)
        .arg("/bin/sh")
        .arg("-c")
        .arg(format!("printf '%s' \"${}\"", env::PLATFORM_HANDLER))
        .env(env::PLATFORM_HANDLER, original)
        .output()
        .await
        .map_err(|e| InterceptorError::Wrapper(format!("{}: {e}", wrapper.display())))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(InterceptorError::Wrapper(format!(
            "{} exited with {}: {}",
            wrapper.display(),
            output.status,
            stderr.trim()
        )));
    }

    let resolved = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if resolved.is_empty() {
        Ok(original.to_string())
    } else {
        tracing::debug!(handler = %resolved, "Previous wrapper resolved handler");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn config() -> InterceptorConfig {
        InterceptorConfig::new("orders".into(), "abc".into()).with_original_handler("index.handler")
    }

    fn script(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("wrapper");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn registry_lookup() {
        let registry = HandlerRegistry::new().with("index.handler", |event, _| async move { Ok(event) });
        let handler = registry.get("index.handler").unwrap();
        assert_eq!(handler.call(json!(1), json!({})).await.unwrap(), json!(1));
        assert!(matches!(
            registry.get("other.handler"),
            Err(InterceptorError::HandlerNotFound(name)) if name == "other.handler"
        ));
    }

    #[tokio::test]
    async fn without_wrapper_original_name_is_used() {
        assert_eq!(resolve_original_handler(&config()).await.unwrap(), "index.handler");
    }

    #[tokio::test]
    async fn missing_original_handler_rejected() {
        let config = InterceptorConfig::new("orders".into(), "abc".into());
        let err = resolve_original_handler(&config).await.unwrap_err();
        assert!(matches!(err, InterceptorError::MissingVariable(name) if name == env::ORIGINAL_HANDLER));
    }

    #[tokio::test]
    async fn wrapper_rewriting_handler_is_followed() {
        let dir = TempDir::new().unwrap();
        let wrapper = script(&dir, "export _HANDLER=\"otel.$_HANDLER\"\nexec \"$@\"");
        let config = config().with_previous_wrapper(wrapper);

        assert_eq!(resolve_original_handler(&config).await.unwrap(), "otel.index.handler");
    }

    #[tokio::test]
    async fn pass_through_wrapper_keeps_handler() {
        let dir = TempDir::new().unwrap();
        let wrapper = script(&dir, "exec \"$@\"");
        let config = config().with_previous_wrapper(wrapper);

        assert_eq!(resolve_original_handler(&config).await.unwrap(), "index.handler");
    }

    #[tokio::test]
    async fn failing_wrapper_reported() {
        let dir = TempDir::new().unwrap();
        let wrapper = script(&dir, "echo broken >&2\nexit 3");
        let config = config().with_previous_wrapper(wrapper);

        let err = resolve_original_handler(&config).await.unwrap_err();
        assert!(matches!(err, InterceptorError::Wrapper(message) if message.contains("broken")));
    }
}
