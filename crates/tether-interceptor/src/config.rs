//! Cold-start configuration read from the injected environment

use crate::error::InterceptorError;
use std::path::PathBuf;
use std::time::Duration;
use tether_core::{env, FunctionId, SessionId};

/// How long a blocking call waits for a sign of life from the developer machine
pub const DEFAULT_FALLBACK: Duration = Duration::from_secs(5);

/// Interceptor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    /// Function being intercepted
    pub function_id: FunctionId,
    /// Session the function reports to
    pub session_id: SessionId,
    /// Mirror mode
    pub mirror: bool,
    /// Minimum time between two mirrored publishes; zero disables throttling
    pub mirror_interval: Duration,
    /// Verbose logging
    pub verbose: bool,
    /// Fallback window of blocking calls
    pub fallback: Duration,
    /// Handler name the platform was configured with before the bridge attached
    pub original_handler: Option<String>,
    /// Wrapper script configured before the bridge attached
    pub previous_wrapper: Option<PathBuf>,
}

impl InterceptorConfig {
    /// Blocking-mode configuration
    #[must_use]
    pub fn new(function_id: FunctionId, session_id: SessionId) -> Self {
        Self {
            function_id,
            session_id,
            mirror: false,
            mirror_interval: Duration::ZERO,
            verbose: false,
            fallback: DEFAULT_FALLBACK,
            original_handler: None,
            previous_wrapper: None,
        }
    }

    /// With mirror mode and its publish interval
    #[inline]
    #[must_use]
    pub fn with_mirror(mut self, interval: Duration) -> Self {
        self.mirror = true;
        self.mirror_interval = interval;
        self
    }

    /// With fallback window
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, fallback: Duration) -> Self {
        self.fallback = fallback;
        self
    }

    /// With original handler name
    #[inline]
    #[must_use]
    pub fn with_original_handler(mut self, handler: impl Into<String>) -> Self {
        self.original_handler = Some(handler.into());
        self
    }

    /// With previously configured wrapper
    #[inline]
    #[must_use]
    pub fn with_previous_wrapper(mut self, wrapper: impl Into<PathBuf>) -> Self {
        self.previous_wrapper = Some(wrapper.into());
        self
    }

    /// Read the configuration from the process environment
    ///
    /// # Errors
    /// See [`InterceptorConfig::from_lookup`]
    pub fn from_env() -> Result<Self, InterceptorError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through a variable lookup
    ///
    /// # Errors
    /// - `InterceptorError::MissingVariable` if the function or session id is absent
    /// - `InterceptorError::InvalidVariable` if the mirror interval or the
    ///   fallback window is not a number
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, InterceptorError> {
        let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let function_id =
            present(env::FUNCTION_ID).ok_or(InterceptorError::MissingVariable(env::FUNCTION_ID))?;
        let session_id =
            present(env::SESSION_ID).ok_or(InterceptorError::MissingVariable(env::SESSION_ID))?;

        let mut config = Self::new(FunctionId::new(function_id), SessionId::new(session_id));
        config.mirror = env::flag(lookup(env::MIRROR_MODE).as_deref());
        config.verbose = env::flag(lookup(env::VERBOSE).as_deref());

        if let Some(raw) = present(env::MIRROR_INTERVAL) {
            let millis = raw.trim().parse::<u64>().map_err(|_| InterceptorError::InvalidVariable {
                name: env::MIRROR_INTERVAL,
                value: raw.clone(),
            })?;
            config.mirror_interval = Duration::from_millis(millis);
        }

        if let Some(raw) = present(env::FALLBACK_TIMEOUT) {
            let millis = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|millis| *millis > 0)
                .ok_or_else(|| InterceptorError::InvalidVariable {
                    name: env::FALLBACK_TIMEOUT,
                    value: raw.clone(),
                })?;
            config.fallback = Duration::from_millis(millis);
        }

        config.original_handler = present(env::ORIGINAL_HANDLER);
        config.previous_wrapper = present(env::PREVIOUS_WRAPPER).map(PathBuf::from);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| vars.get(name).map(|v| (*v).to_string())
    }

    #[test]
    fn blocking_defaults() {
        let config = InterceptorConfig::from_lookup(lookup(&[
            (env::FUNCTION_ID, "orders"),
            (env::SESSION_ID, "abc"),
        ]))
        .unwrap();

        assert_eq!(config, InterceptorConfig::new("orders".into(), "abc".into()));
        assert_eq!(config.fallback, Duration::from_secs(5));
        assert_eq!(config.mirror_interval, Duration::ZERO);
    }

    #[test]
    fn mirror_without_interval_is_unthrottled() {
        let config = InterceptorConfig::from_lookup(lookup(&[
            (env::FUNCTION_ID, "orders"),
            (env::SESSION_ID, "MIRROR_MODE"),
            (env::MIRROR_MODE, "true"),
        ]))
        .unwrap();

        assert!(config.mirror);
        assert_eq!(config.mirror_interval, Duration::ZERO);
    }

    #[test]
    fn fallback_window_from_environment() {
        let config = InterceptorConfig::from_lookup(lookup(&[
            (env::FUNCTION_ID, "orders"),
            (env::SESSION_ID, "abc"),
            (env::FALLBACK_TIMEOUT, "1500"),
        ]))
        .unwrap();
        assert_eq!(config.fallback, Duration::from_millis(1500));

        for bad in ["0", "later"] {
            let vars = [
                (env::FUNCTION_ID, "orders"),
                (env::SESSION_ID, "abc"),
                (env::FALLBACK_TIMEOUT, bad),
            ];
            let err = InterceptorConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, InterceptorError::InvalidVariable { name, .. } if name == env::FALLBACK_TIMEOUT));
        }
    }

    #[test]
    fn mirror_settings_and_wrapper_chain() {
        let config = InterceptorConfig::from_lookup(lookup(&[
            (env::FUNCTION_ID, "orders"),
            (env::SESSION_ID, "MIRROR_MODE"),
            (env::MIRROR_MODE, "true"),
            (env::MIRROR_INTERVAL, "1500"),
            (env::VERBOSE, "true"),
            (env::ORIGINAL_HANDLER, "index.handler"),
            (env::PREVIOUS_WRAPPER, "/opt/otel-handler"),
        ]))
        .unwrap();

        assert!(config.mirror);
        assert!(config.verbose);
        assert_eq!(config.mirror_interval, Duration::from_millis(1500));
        assert_eq!(config.original_handler.as_deref(), Some("index.handler"));
        assert_eq!(config.previous_wrapper, Some(PathBuf::from("/opt/otel-handler")));
    }

    #[test]
    fn missing_ids_rejected() {
        let err = InterceptorConfig::from_lookup(lookup(&[(env::SESSION_ID, "abc")])).unwrap_err();
        assert!(matches!(err, InterceptorError::MissingVariable(name) if name == env::FUNCTION_ID));
        assert!(err.is_config_error());

        let err = InterceptorConfig::from_lookup(lookup(&[(env::FUNCTION_ID, "orders")])).unwrap_err();
        assert!(matches!(err, InterceptorError::MissingVariable(name) if name == env::SESSION_ID));
    }

    #[test]
    fn invalid_interval_rejected() {
        let err = InterceptorConfig::from_lookup(lookup(&[
            (env::FUNCTION_ID, "orders"),
            (env::SESSION_ID, "abc"),
            (env::MIRROR_INTERVAL, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, InterceptorError::InvalidVariable { value, .. } if value == "soon"));
    }
}
