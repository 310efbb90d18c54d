//! Compiler seam
//!
//! A [`Compiler`] creates a long-lived [`CompilerContext`] from resolved
//! options; the context can be rebuilt many times, which is what makes
//! rebuilds after a source change incremental.
//!
//! [`CommandCompiler`] drives an external bundler executable (esbuild's
//! command line interface by default).

use crate::error::BuildError;
use crate::options::{BuildOptions, SourceMap};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tether_core::FunctionId;

/// Name of the metafile written next to the bundle
pub const METAFILE_NAME: &str = "meta.json";

/// Result of one (re)build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Emitted files, as reported by the compiler
    pub outputs: Vec<PathBuf>,
}

/// Creates incremental compiler contexts
#[async_trait::async_trait]
pub trait Compiler: Send + Sync {
    /// Create a context for one function
    async fn create_context(
        &self,
        function_id: &FunctionId,
        options: &BuildOptions,
    ) -> Result<Box<dyn CompilerContext>, BuildError>;
}

/// A reusable compiler context
#[async_trait::async_trait]
pub trait CompilerContext: Send + Sync {
    /// Recompile with the options the context was created with
    async fn rebuild(&mut self) -> Result<BuildOutput, BuildError>;
}

/// Compiler backed by an external bundler executable
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: PathBuf,
    working_dir: PathBuf,
}

impl CommandCompiler {
    /// Use `program` and run it from `working_dir`
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
        }
    }

    /// `esbuild` from the search path
    #[must_use]
    pub fn esbuild(working_dir: impl Into<PathBuf>) -> Self {
        Self::new("esbuild", working_dir)
    }
}

#[async_trait::async_trait]
impl Compiler for CommandCompiler {
    async fn create_context(
        &self,
        function_id: &FunctionId,
        options: &BuildOptions,
    ) -> Result<Box<dyn CompilerContext>, BuildError> {
        if !options.plugins.is_empty() {
            tracing::warn!(
                function_id = %function_id,
                plugins = ?options.plugins,
                "Bundler plugins cannot be passed on the command line, ignoring them"
            );
        }

        Ok(Box::new(CommandContext {
            function_id: function_id.clone(),
            program: self.program.clone(),
            working_dir: self.working_dir.clone(),
            args: command_args(options),
            node_path: options.node_paths.join(":"),
            metafile: options.outdir.join(METAFILE_NAME),
        }))
    }
}

struct CommandContext {
    function_id: FunctionId,
    program: PathBuf,
    working_dir: PathBuf,
    args: Vec<String>,
    node_path: String,
    metafile: PathBuf,
}

#[derive(Deserialize)]
struct Metafile {
    #[serde(default)]
    outputs: BTreeMap<String, serde_json::Value>,
}

#[async_trait::async_trait]
impl CompilerContext for CommandContext {
    async fn rebuild(&mut self) -> Result<BuildOutput, BuildError> {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).current_dir(&self.working_dir);
        if !self.node_path.is_empty() {
            command.env("NODE_PATH", &self.node_path);
        }

        let output = command.output().await.map_err(|e| {
            BuildError::CompilerUnavailable(format!("{}: {e}", self.program.display()))
        })?;
        if !output.status.success() {
            return Err(BuildError::Compile {
                function_id: self.function_id.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = tokio::fs::read_to_string(&self.metafile)
            .await
            .map_err(|e| BuildError::io(&self.metafile, e))?;
        let metafile: Metafile = serde_json::from_str(&text).map_err(|e| BuildError::Compile {
            function_id: self.function_id.clone(),
            message: format!("unreadable metafile: {e}"),
        })?;

        Ok(BuildOutput {
            outputs: metafile.outputs.into_keys().map(PathBuf::from).collect(),
        })
    }
}

/// Command line for a bundler invocation
#[must_use]
pub fn command_args(options: &BuildOptions) -> Vec<String> {
    let mut args: Vec<String> = options
        .entry_points
        .iter()
        .map(|p| p.display().to_string())
        .collect();

    if options.bundle {
        args.push("--bundle".into());
    }
    args.push(format!("--platform={}", options.platform));
    args.push(format!("--format={}", format_flag(options)));
    args.push(format!("--target={}", options.target));
    args.push(format!("--outdir={}", options.outdir.display()));
    args.push("--log-level=silent".into());
    if options.keep_names {
        args.push("--keep-names".into());
    }
    if options.minify {
        args.push("--minify".into());
    }
    if options.metafile {
        args.push(format!("--metafile={}", options.outdir.join(METAFILE_NAME).display()));
    }
    match options.sourcemap {
        SourceMap::Linked => args.push("--sourcemap=linked".into()),
        SourceMap::Inline => args.push("--sourcemap=inline".into()),
        SourceMap::None => {}
    }

    args.extend(options.external.iter().map(|e| format!("--external:{e}")));
    push_list(&mut args, "--main-fields", &options.main_fields);
    push_list(&mut args, "--conditions", &options.conditions);
    push_list(&mut args, "--resolve-extensions", &options.resolve_extensions);
    push_map(&mut args, "--alias", &options.alias);
    push_map(&mut args, "--loader", &options.loader);
    push_map(&mut args, "--define", &options.define);
    push_map(&mut args, "--out-extension", &options.out_extension);
    push_map(&mut args, "--banner", &options.banner);
    push_map(&mut args, "--footer", &options.footer);
    args
}

fn format_flag(options: &BuildOptions) -> &'static str {
    match options.format {
        tether_core::ModuleFormat::Esm => "esm",
        tether_core::ModuleFormat::CommonJs => "cjs",
    }
}

fn push_list(args: &mut Vec<String>, flag: &str, values: &[String]) {
    if !values.is_empty() {
        args.push(format!("{flag}={}", values.join(",")));
    }
}

fn push_map(args: &mut Vec<String>, flag: &str, values: &BTreeMap<String, String>) {
    args.extend(values.iter().map(|(k, v)| format!("{flag}:{k}={v}")));
}

/// First script among the outputs, resolved against `root`
#[must_use]
pub fn find_artifact(output: &BuildOutput, root: &Path) -> Option<PathBuf> {
    output
        .outputs
        .iter()
        .find(|path| tether_core::types::is_script_path(path))
        .map(|path| root.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{BundlingHints, ModuleFormat};

    #[test]
    fn esm_command_line() {
        let options = BuildOptions::defaults("src/orders.ts", "out/orders", ModuleFormat::Esm)
            .merged_with(&BundlingHints {
                external: Some(vec!["@aws-sdk/*".into()]),
                ..BundlingHints::default()
            });
        let args = command_args(&options);

        assert_eq!(args[0], "src/orders.ts");
        assert!(args.contains(&"--bundle".to_string()));
        assert!(args.contains(&"--format=esm".to_string()));
        assert!(args.contains(&"--target=esnext".to_string()));
        assert!(args.contains(&"--main-fields=module,main".to_string()));
        assert!(args.contains(&"--external:@aws-sdk/*".to_string()));
        assert!(args.contains(&"--metafile=out/orders/meta.json".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--banner:js=import")));
    }

    #[test]
    fn cjs_command_line_has_no_banner() {
        let options = BuildOptions::defaults("src/a.ts", "out", ModuleFormat::CommonJs);
        let args = command_args(&options);
        assert!(args.contains(&"--format=cjs".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--banner")));
    }

    #[test]
    fn artifact_is_first_script_output() {
        let output = BuildOutput {
            outputs: vec![
                PathBuf::from(".tether/artifacts/a/orders.js.map"),
                PathBuf::from(".tether/artifacts/a/orders.mjs"),
            ],
        };
        let artifact = find_artifact(&output, Path::new("/work")).unwrap();
        assert_eq!(artifact, PathBuf::from("/work/.tether/artifacts/a/orders.mjs"));
        assert!(find_artifact(&BuildOutput::default(), Path::new("/work")).is_none());
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = CommandCompiler::new(dir.path().join("no-such-bundler"), dir.path());
        let options = BuildOptions::defaults("a.ts", dir.path(), ModuleFormat::CommonJs);
        let mut context = compiler
            .create_context(&FunctionId::new("a"), &options)
            .await
            .unwrap();
        let err = context.rebuild().await.unwrap_err();
        assert!(matches!(err, BuildError::CompilerUnavailable(_)));
    }
}
