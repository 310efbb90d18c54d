//! Source watcher
//!
//! Subscribes to file system notifications for the tree holding the project
//! and every function's code. Read-only access is not a change. Once a
//! watched path changes and the tree then stays quiet for the debounce
//! window, the watcher:
//! - rediscovers the functions when a [`DiscoverySource`] is configured
//! - flags every cached build stale
//! - stops every sandbox, deferring busy ones until their response is out
//!
//! Refreshes never overlap; changes arriving while one runs are folded into
//! a single follow-up refresh.

use crate::error::SessionError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_build::BuildEngine;
use tether_core::{FunctionCatalog, FunctionDescriptor, WatchConfig};
use tether_sandbox::SandboxPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shortest quiet period before a refresh
const MIN_DEBOUNCE: Duration = Duration::from_millis(10);

/// Source of the current function list
#[async_trait::async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Discover the deployable functions
    async fn discover(&self) -> Result<Vec<FunctionDescriptor>, SessionError>;
}

/// Deepest directory containing the project root and every function's code
#[must_use]
pub fn watch_root(project_root: &Path, functions: &[FunctionDescriptor]) -> PathBuf {
    functions
        .iter()
        .map(|f| {
            let code = project_root.join(&f.code_path);
            code.parent().map_or(code.clone(), Path::to_path_buf)
        })
        .fold(project_root.to_path_buf(), |root, dir| common_ancestor(&root, &dir))
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// Which paths under the watch root count as sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFilter {
    root: PathBuf,
    ignore: Vec<String>,
    excluded: Vec<PathBuf>,
}

impl WatchFilter {
    /// Filter skipping every path with a component named in `ignore`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, ignore: &[String]) -> Self {
        Self {
            root: root.into(),
            ignore: ignore.to_vec(),
            excluded: Vec::new(),
        }
    }

    /// Also skip everything below `dir`
    #[inline]
    #[must_use]
    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    /// Whether a change to `path` concerns the sources
    #[must_use]
    pub fn is_watched(&self, path: &Path) -> bool {
        if self.excluded.iter().any(|dir| path.starts_with(dir)) {
            return false;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        !relative.components().any(|component| match component {
            Component::Normal(name) => self.ignore.iter().any(|i| name == i.as_str()),
            _ => false,
        })
    }
}

/// Notification-driven watcher refreshing builds and sandboxes on source changes
pub struct SourceWatcher {
    root: PathBuf,
    filter: WatchFilter,
    debounce: Duration,
    catalog: FunctionCatalog,
    build: Arc<BuildEngine>,
    sandboxes: Arc<SandboxPool>,
    discovery: Option<Arc<dyn DiscoverySource>>,
    refreshes: AtomicUsize,
}

impl std::fmt::Debug for SourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("root", &self.root)
            .field("debounce", &self.debounce)
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

impl SourceWatcher {
    /// Watcher over `root`
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        settings: &WatchConfig,
        catalog: FunctionCatalog,
        build: Arc<BuildEngine>,
        sandboxes: Arc<SandboxPool>,
    ) -> Self {
        let root = root.into();
        Self {
            filter: WatchFilter::new(root.clone(), &settings.ignore),
            root,
            debounce: Duration::from_millis(settings.debounce_ms).max(MIN_DEBOUNCE),
            catalog,
            build,
            sandboxes,
            discovery: None,
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Never react to changes below `dir`
    #[inline]
    #[must_use]
    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.filter = self.filter.excluding(dir);
        self
    }

    /// With rediscovery on change
    #[inline]
    #[must_use]
    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoverySource>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Watched directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths that count as sources
    #[inline]
    #[must_use]
    pub fn filter(&self) -> &WatchFilter {
        &self.filter
    }

    /// Number of completed refreshes
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// React to a source change
    pub async fn refresh(&self) {
        if let Some(discovery) = &self.discovery {
            match discovery.discover().await {
                Ok(functions) => {
                    if self.catalog.replace(functions) {
                        tracing::info!("Function list changed");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rediscovery failed, keeping the current function list");
                }
            }
        }

        self.build.mark_all_stale();
        self.sandboxes.stop_all().await;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Sources changed, functions will be rebuilt on next invocation");
    }

    /// Subscribe to notifications for the watched tree
    ///
    /// # Errors
    /// - `SessionError::Watch` if the notifier cannot be created or the root
    ///   cannot be watched
    pub fn spawn(self: Arc<Self>) -> Result<WatchHandle, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut notifier = notify::recommended_watcher(move |event: notify::Result<Event>| {
            // receiver gone means the handle was dropped
            let _ = tx.send(event);
        })?;
        notifier.watch(&self.root, RecursiveMode::Recursive)?;

        tracing::debug!(root = %self.root.display(), "Watching sources");
        Ok(WatchHandle {
            task: tokio::spawn(Arc::clone(&self).run(rx)),
            watcher: self,
            _notifier: notifier,
        })
    }

    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<notify::Result<Event>>) {
        while let Some(event) = events.recv().await {
            if !self.is_source_change(event) {
                continue;
            }

            tracing::debug!("Change detected, waiting for quiet period");
            loop {
                match tokio::time::timeout(self.debounce, events.recv()).await {
                    Ok(Some(_)) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
            self.refresh().await;
        }
        tracing::debug!("Source notifications ended");
    }

    /// Whether a notification reports a change to a watched path
    fn is_source_change(&self, event: notify::Result<Event>) -> bool {
        match event {
            Ok(event) => is_modification(&event.kind)
                && event.paths.iter().any(|path| self.filter.is_watched(path)),
            Err(e) => {
                tracing::warn!(error = %e, "File watch error");
                false
            }
        }
    }
}

/// Everything but read-only access modifies the tree
fn is_modification(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

/// Running watcher; notifications stop when dropped
pub struct WatchHandle {
    watcher: Arc<SourceWatcher>,
    task: JoinHandle<()>,
    _notifier: RecommendedWatcher,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

impl WatchHandle {
    /// The watcher
    #[must_use]
    pub fn watcher(&self) -> &Arc<SourceWatcher> {
        &self.watcher
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
