//! Process runtime
//!
//! Each context is a child process (typically a language runner such as
//! `node runner.mjs`) started with the worker environment. Requests go to its
//! stdin as one JSON object per line carrying a numeric `id`; the runner
//! answers each with one line echoing that id, either
//! `{"id": n, "ok": <result>}` or
//! `{"id": n, "error": {"errorType", "errorMessage", "trace"}}`.
//!
//! Any other stdout line is handler output and goes to the log, as does
//! stderr. A reply carrying the wrong id means the stream is out of step and
//! the context is torn down.

use super::{crashed, ExecutionContext, ExecutionRequest, ExecutionRuntime, StartSpec};
use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tether_core::HandlerFailure;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Runtime running each context as a child process
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessRuntime {
    /// Run `program` for every context
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// With program arguments
    #[inline]
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait::async_trait]
impl ExecutionRuntime for ProcessRuntime {
    async fn start(&self, spec: StartSpec) -> Result<Box<dyn ExecutionContext>, SandboxError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&spec.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {e}", self.program.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Spawn("runner stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Spawn("runner stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let worker_id = spec.worker_id.clone();
            let function_id = spec.function_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(%function_id, %worker_id, "{line}");
                }
            });
        }

        tracing::debug!(worker_id = %spec.worker_id, function_id = %spec.function_id, "Started sandbox process");
        Ok(Box::new(ProcessContext {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            worker_id: spec.worker_id,
            next_id: 0,
            alive: true,
        }))
    }
}

#[derive(Serialize)]
struct RequestFrame<'a> {
    id: u64,
    #[serde(flatten)]
    request: &'a ExecutionRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Reply {
    Ok(Value),
    Error(HandlerFailure),
}

#[derive(Deserialize)]
struct ReplyFrame {
    id: u64,
    #[serde(flatten)]
    reply: Reply,
}

/// Parse a stdout line as a runner reply; `None` for handler output
fn parse_reply(line: &str) -> Option<ReplyFrame> {
    if !line.trim_start().starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

struct ProcessContext {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    worker_id: tether_core::WorkerId,
    next_id: u64,
    alive: bool,
}

impl ProcessContext {
    async fn exit_detail(&mut self) -> String {
        self.alive = false;
        match self.child.wait().await {
            Ok(status) => format!("runner exited with {status}"),
            Err(e) => format!("runner lost: {e}"),
        }
    }

    /// Read stdout until the reply for `id`, logging handler output on the way
    async fn await_reply(&mut self, id: u64) -> Result<Value, HandlerFailure> {
        loop {
            let line = match self.stdout.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => {
                    let detail = self.exit_detail().await;
                    return Err(crashed(detail));
                }
            };
            let Some(frame) = parse_reply(&line) else {
                tracing::info!(worker_id = %self.worker_id, "{line}");
                continue;
            };
            if frame.id != id {
                tracing::warn!(worker_id = %self.worker_id, expected = id, got = frame.id, "Runner reply out of step");
                self.terminate().await;
                return Err(crashed(format!(
                    "reply for request {} while awaiting {id}",
                    frame.id
                )));
            }
            return match frame.reply {
                Reply::Ok(value) => Ok(value),
                Reply::Error(failure) => Err(failure),
            };
        }
    }
}

#[async_trait::async_trait]
impl ExecutionContext for ProcessContext {
    async fn invoke(&mut self, request: ExecutionRequest) -> Result<Value, HandlerFailure> {
        if !self.alive {
            return Err(crashed("terminated"));
        }

        self.next_id += 1;
        let id = self.next_id;
        let mut line = serde_json::to_vec(&RequestFrame { id, request: &request })
            .map_err(|e| HandlerFailure::new("SerializationError", e.to_string()))?;
        line.push(b'\n');

        let written = async {
            self.stdin.write_all(&line).await?;
            self.stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!(error = %e, "Runner stdin closed");
            let detail = self.exit_detail().await;
            return Err(crashed(detail));
        }

        self.await_reply(id).await
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    async fn terminate(&mut self) {
        self.alive = false;
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Runner already gone");
        }
        let _ = self.child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tether_core::{FunctionId, WorkerId};

    fn sh(script: &str) -> ProcessRuntime {
        ProcessRuntime::new("sh").with_args(["-c", script])
    }

    /// Shell prelude binding `$id` to the request id of `$line`
    const READ_ID: &str = r#"id=$(printf '%s' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')"#;

    fn spec() -> StartSpec {
        StartSpec {
            worker_id: WorkerId::new("w1"),
            function_id: FunctionId::new("orders"),
            environment: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
        }
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            function_id: FunctionId::new("orders"),
            artifact: "orders.js".into(),
            handler: "handler".into(),
            environment: BTreeMap::new(),
            event: json!({}),
            context: json!({}),
        }
    }

    #[tokio::test]
    async fn replies_are_read_per_line() {
        let runtime = sh(&format!(
            r#"while read line; do {READ_ID}; printf '{{"id":%s,"ok":{{"greeting":"%s"}}}}\n' "$id" "$GREETING"; done"#
        ));
        let mut ctx = runtime.start(spec()).await.unwrap();

        assert_eq!(ctx.invoke(request()).await.unwrap(), json!({ "greeting": "hi" }));
        assert_eq!(ctx.invoke(request()).await.unwrap(), json!({ "greeting": "hi" }));
        ctx.terminate().await;
        assert!(!ctx.is_alive());
    }

    #[tokio::test]
    async fn error_reply_is_failure() {
        let runtime = sh(&format!(
            r#"while read line; do {READ_ID}; printf '{{"id":%s,"error":{{"errorType":"TypeError","errorMessage":"bad","trace":"at x"}}}}\n' "$id"; done"#
        ));
        let mut ctx = runtime.start(spec()).await.unwrap();

        let failure = ctx.invoke(request()).await.unwrap_err();
        assert_eq!(failure.error_type, "TypeError");
        assert_eq!(failure.trace.as_deref(), Some("at x"));
        assert!(ctx.is_alive());
    }

    #[tokio::test]
    async fn handler_output_is_not_taken_for_a_reply() {
        let runtime = sh(&format!(
            r#"while read line; do {READ_ID}; echo "handler log"; echo '{{"level":"info"}}'; printf '{{"id":%s,"ok":%s}}\n' "$id" "$id"; done"#
        ));
        let mut ctx = runtime.start(spec()).await.unwrap();

        assert_eq!(ctx.invoke(request()).await.unwrap(), json!(1));
        assert_eq!(ctx.invoke(request()).await.unwrap(), json!(2));
        assert!(ctx.is_alive());
    }

    #[tokio::test]
    async fn reply_out_of_step_tears_the_context_down() {
        let runtime = sh(r#"while read line; do echo '{"id":99,"ok":"stale"}'; done"#);
        let mut ctx = runtime.start(spec()).await.unwrap();

        let failure = ctx.invoke(request()).await.unwrap_err();
        assert_eq!(failure.error_type, "SandboxCrashed");
        assert!(!ctx.is_alive());
        let again = ctx.invoke(request()).await.unwrap_err();
        assert_eq!(again.error_type, "SandboxCrashed");
    }

    #[test]
    fn request_frame_leads_with_id() {
        let request = request();
        let line = serde_json::to_string(&RequestFrame { id: 7, request: &request }).unwrap();
        assert!(line.starts_with(r#"{"id":7,"functionId":"orders""#));
    }

    #[tokio::test]
    async fn crash_is_reported_not_hung() {
        let runtime = sh("read line; exit 3");
        let mut ctx = runtime.start(spec()).await.unwrap();

        let failure = ctx.invoke(request()).await.unwrap_err();
        assert_eq!(failure.error_type, "SandboxCrashed");
        assert!(!ctx.is_alive());
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let runtime = ProcessRuntime::new("/nonexistent/tether-runner");
        let err = runtime.start(spec()).await.err().unwrap();
        assert!(matches!(err, SandboxError::Spawn(_)));
    }
}
