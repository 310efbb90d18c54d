//! Build engine behaviour against a recording compiler

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_build::prelude::*;
use tether_build::{BuildOutput, CompilerContext};
use tether_core::{FunctionCatalog, FunctionDescriptor, FunctionId, ModuleFormat, TetherConfig};

#[derive(Default)]
struct RecordingCompiler {
    contexts: AtomicUsize,
    rebuilds: Arc<AtomicUsize>,
    fail_next: Arc<AtomicBool>,
    options: Mutex<Vec<BuildOptions>>,
}

struct RecordingContext {
    root: PathBuf,
    outdir: PathBuf,
    rebuilds: Arc<AtomicUsize>,
    fail_next: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Compiler for RecordingCompiler {
    async fn create_context(
        &self,
        _function_id: &FunctionId,
        options: &BuildOptions,
    ) -> Result<Box<dyn CompilerContext>, BuildError> {
        self.contexts.fetch_add(1, Ordering::SeqCst);
        self.options.lock().push(options.clone());
        let root = options.entry_points[0]
            .ancestors()
            .nth(2)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Box::new(RecordingContext {
            root,
            outdir: options.outdir.clone(),
            rebuilds: Arc::clone(&self.rebuilds),
            fail_next: Arc::clone(&self.fail_next),
        }))
    }
}

#[async_trait::async_trait]
impl CompilerContext for RecordingContext {
    async fn rebuild(&mut self) -> Result<BuildOutput, BuildError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BuildError::Compile {
                function_id: FunctionId::new("orders"),
                message: "Expected \";\"".into(),
            });
        }
        std::fs::write(self.outdir.join("orders.js"), "exports.handler = () => 1;").unwrap();
        let relative = self.outdir.strip_prefix(&self.root).unwrap().join("orders.js");
        Ok(BuildOutput {
            outputs: vec![relative.with_extension("js.map"), relative],
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    compiler: Arc<RecordingCompiler>,
    engine: Arc<BuildEngine>,
}

fn fixture(descriptors: Vec<FunctionDescriptor>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("src/orders.ts"), "export const handler = () => 1;").unwrap();

    let compiler = Arc::new(RecordingCompiler::default());
    let config = TetherConfig::new().with_project_root(&root);
    let engine = Arc::new(BuildEngine::new(
        FunctionCatalog::from_descriptors(descriptors),
        compiler.clone(),
        &config,
    ));
    Fixture {
        _dir: dir,
        root,
        compiler,
        engine,
    }
}

fn orders() -> FunctionDescriptor {
    FunctionDescriptor::new("orders", "src/orders.ts")
}

#[tokio::test]
async fn concurrent_requests_share_one_build() {
    let fx = fixture(vec![orders()]);
    let id = FunctionId::new("orders");

    let (a, b) = tokio::join!(fx.engine.get_artifact(&id), fx.engine.get_artifact(&id));

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(fx.compiler.contexts.load(Ordering::SeqCst), 1);
    assert_eq!(fx.compiler.rebuilds.load(Ordering::SeqCst), 1);
    assert_eq!(fx.engine.stats().builds, 1);
    assert_eq!(fx.engine.stats().cache_hits, 1);
}

#[tokio::test]
async fn artifact_lands_in_function_directory() {
    let fx = fixture(vec![orders()]);
    let id = FunctionId::new("orders");

    let artifact = fx.engine.get_artifact(&id).await.unwrap();
    assert_eq!(artifact, fx.root.join(".tether/artifacts/orders/orders.js"));
    assert!(artifact.exists());
    assert!(fx.engine.is_current(&id));
}

#[tokio::test]
async fn stale_build_rebuilds_once_reusing_context() {
    let fx = fixture(vec![orders()]);
    let id = FunctionId::new("orders");

    fx.engine.get_artifact(&id).await.unwrap();
    fx.engine.mark_all_stale();
    assert!(!fx.engine.is_current(&id));

    fx.engine.get_artifact(&id).await.unwrap();
    fx.engine.get_artifact(&id).await.unwrap();

    assert_eq!(fx.compiler.rebuilds.load(Ordering::SeqCst), 2);
    assert_eq!(fx.compiler.contexts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scripts_are_returned_unchanged() {
    let fx = fixture(vec![FunctionDescriptor::new("plain", "src/plain.mjs")]);

    let artifact = fx.engine.get_artifact(&FunctionId::new("plain")).await.unwrap();
    assert_eq!(artifact, fx.root.join("src/plain.mjs"));
    assert_eq!(fx.engine.stats().builds, 0);
}

#[tokio::test]
async fn manifest_sets_format_and_is_copied() {
    let fx = fixture(vec![orders().with_manifest("package.json")]);
    std::fs::write(fx.root.join("package.json"), r#"{"type":"module"}"#).unwrap();

    let artifact = fx.engine.get_artifact(&FunctionId::new("orders")).await.unwrap();

    assert_eq!(fx.compiler.options.lock()[0].format, ModuleFormat::Esm);
    let copied = artifact.parent().unwrap().join("package.json");
    assert_eq!(std::fs::read_to_string(copied).unwrap(), r#"{"type":"module"}"#);
}

#[tokio::test]
async fn failed_build_is_retried() {
    let fx = fixture(vec![orders()]);
    let id = FunctionId::new("orders");
    fx.compiler.fail_next.store(true, Ordering::SeqCst);

    let err = fx.engine.get_artifact(&id).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(!fx.engine.is_current(&id));

    fx.engine.get_artifact(&id).await.unwrap();
    assert_eq!(fx.compiler.contexts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_function_rejected() {
    let fx = fixture(vec![]);
    let err = fx.engine.get_artifact(&FunctionId::new("ghost")).await.unwrap_err();
    assert!(matches!(err, BuildError::FunctionNotFound(_)));
}
