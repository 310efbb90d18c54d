//! Session configuration
//!
//! Loaded from a TOML file (`tether.toml` by default) and refined with
//! builder methods. Every field has a default so an empty file is valid.

use crate::catalog::NameFilter;
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "tether.toml";

/// Default mirror-mode interval in milliseconds
pub const DEFAULT_MIRROR_INTERVAL_MS: u64 = 3000;

/// Default folder for build output and temporary files
pub const DEFAULT_OUTPUT_DIR: &str = ".tether";

/// Default archive name of the bridge layer, inside the output folder
pub const DEFAULT_LAYER_ARCHIVE: &str = "layer.zip";

/// Top-level configuration of a debugging session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Verbose logging
    pub verbose: bool,
    /// Mirror mode: the cloud keeps serving, the local side observes
    pub mirror: bool,
    /// Minimum milliseconds between two mirrored invocations
    pub mirror_interval_ms: u64,
    /// Only wire functions whose name matches this pattern
    pub function_filter: Option<String>,
    /// Project root; defaults to the working directory
    pub project_root: Option<PathBuf>,
    /// Output folder, relative to the project root
    pub output_dir: PathBuf,
    /// Cloud region
    pub region: Option<String>,
    /// Credentials profile
    pub profile: Option<String>,
    /// Role to assume for management calls
    pub role: Option<String>,
    /// Intercepted functions get at least this timeout
    pub timeout_floor_secs: u32,
    /// How long the interceptor waits for the developer machine
    pub fallback_timeout_ms: u64,
    /// Apply reconciliation mutations concurrently
    pub parallel_deploy: bool,
    /// Bridge layer archive; defaults to `layer.zip` in the output folder
    pub layer_archive: Option<PathBuf>,
    /// Sandboxes idle this long are torn down; zero keeps them
    pub idle_reclaim_ms: u64,
    /// File watching
    pub watch: WatchConfig,
}

impl TetherConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// - `CoreError::ConfigParse` on malformed TOML
    /// - `CoreError::InvalidValue` on inconsistent values
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    ///
    /// # Errors
    /// - `CoreError::ConfigRead` if the file cannot be read
    /// - any error of [`TetherConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load a configuration file if it exists, defaults otherwise
    ///
    /// # Errors
    /// Same as [`TetherConfig::load`] for an existing file.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Check value consistency
    ///
    /// # Errors
    /// - `CoreError::InvalidValue` for a zero fallback timeout
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.fallback_timeout_ms == 0 {
            return Err(CoreError::InvalidValue {
                key: "fallback_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// With mirror mode
    #[inline]
    #[must_use]
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// With mirror interval
    #[inline]
    #[must_use]
    pub fn with_mirror_interval(mut self, interval: Duration) -> Self {
        self.mirror_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With verbose logging
    #[inline]
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// With function name filter
    #[inline]
    #[must_use]
    pub fn with_function_filter(mut self, filter: impl Into<String>) -> Self {
        self.function_filter = Some(filter.into());
        self
    }

    /// With project root
    #[inline]
    #[must_use]
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// With serial reconciliation
    #[inline]
    #[must_use]
    pub fn with_parallel_deploy(mut self, parallel: bool) -> Self {
        self.parallel_deploy = parallel;
        self
    }

    /// With bridge layer archive
    #[inline]
    #[must_use]
    pub fn with_layer_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.layer_archive = Some(path.into());
        self
    }

    /// Resolved bridge layer archive
    #[must_use]
    pub fn resolved_layer_archive(&self) -> PathBuf {
        match &self.layer_archive {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.resolved_project_root().join(path),
            None => self.resolved_output_dir().join(DEFAULT_LAYER_ARCHIVE),
        }
    }

    /// Name filter derived from `function_filter`
    #[must_use]
    pub fn name_filter(&self) -> NameFilter {
        NameFilter::from(self.function_filter.clone())
    }

    /// Mirror interval as a duration
    #[inline]
    #[must_use]
    pub fn mirror_interval(&self) -> Duration {
        Duration::from_millis(self.mirror_interval_ms)
    }

    /// Interceptor fallback window as a duration
    #[inline]
    #[must_use]
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    /// Idle threshold of sandbox reclaim, `None` when disabled
    #[inline]
    #[must_use]
    pub fn idle_reclaim(&self) -> Option<Duration> {
        (self.idle_reclaim_ms > 0).then(|| Duration::from_millis(self.idle_reclaim_ms))
    }

    /// Resolved absolute project root
    #[must_use]
    pub fn resolved_project_root(&self) -> PathBuf {
        let root = match &self.project_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        std::path::absolute(&root).unwrap_or(root)
    }

    /// Absolute output folder
    #[must_use]
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.resolved_project_root().join(&self.output_dir)
    }
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            mirror: false,
            mirror_interval_ms: DEFAULT_MIRROR_INTERVAL_MS,
            function_filter: None,
            project_root: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            region: None,
            profile: None,
            role: None,
            timeout_floor_secs: 300,
            fallback_timeout_ms: 5000,
            parallel_deploy: true,
            layer_archive: None,
            idle_reclaim_ms: 600_000,
            watch: WatchConfig::default(),
        }
    }
}

/// File watcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Watch sources and rebuild on change
    pub enabled: bool,
    /// Quiet period before a change is acted upon
    pub debounce_ms: u64,
    /// Path components that are never watched; the output folder is
    /// excluded wherever it is configured
    pub ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 1000,
            ignore: vec![
                "node_modules".to_string(),
                DEFAULT_OUTPUT_DIR.to_string(),
                ".git".to_string(),
                "debug.log".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = TetherConfig::from_toml_str("").unwrap();
        assert_eq!(config, TetherConfig::default());
        assert_eq!(config.mirror_interval(), Duration::from_millis(3000));
        assert_eq!(config.fallback_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_reclaim(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_idle_reclaim_disables_it() {
        let config = TetherConfig::from_toml_str("idle_reclaim_ms = 0").unwrap();
        assert_eq!(config.idle_reclaim(), None);
    }

    #[test]
    fn toml_overrides() {
        let config = TetherConfig::from_toml_str(
            r#"
            mirror = true
            mirror_interval_ms = 1000
            function_filter = "orders*"
            parallel_deploy = false

            [watch]
            debounce_ms = 200
            "#,
        )
        .unwrap();

        assert!(config.mirror);
        assert_eq!(config.mirror_interval_ms, 1000);
        assert!(config.name_filter().matches("orders-list"));
        assert!(!config.parallel_deploy);
        assert_eq!(config.watch.debounce_ms, 200);
        assert!(config.watch.enabled);
    }

    #[test]
    fn zero_fallback_rejected() {
        let err = TetherConfig::from_toml_str("fallback_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { key: "fallback_timeout_ms", .. }));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = TetherConfig::from_toml_str("mirror = [").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse(_)));
    }

    #[test]
    fn load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = TetherConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, TetherConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "verbose = true").unwrap();
        let config = TetherConfig::load(&path).unwrap();
        assert!(config.verbose);
    }

    #[test]
    fn output_dir_is_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = TetherConfig::new().with_project_root(dir.path());
        assert!(config.resolved_output_dir().ends_with(".tether"));
        assert!(config.resolved_output_dir().is_absolute());
    }

    #[test]
    fn layer_archive_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let config = TetherConfig::new().with_project_root(dir.path());
        assert_eq!(
            config.resolved_layer_archive(),
            config.resolved_output_dir().join("layer.zip")
        );

        let config = config.with_layer_archive("dist/bridge.zip");
        assert!(config.resolved_layer_archive().ends_with("dist/bridge.zip"));
        assert!(config.resolved_layer_archive().is_absolute());
    }
}
