//! # Action Executor
//!
//! Runs one action as a child process with a callback channel attached.
//!
//! The interpreter is chosen from the executable's extension; unknown extensions
//! are executed directly. The child receives the callback pipe as trailing
//! `-callbackPipe <path>` arguments and in `RUNBOOK_CALLBACK_PIPE`. Standard output
//! and error are pumped into the configured sinks while the child runs; standard
//! error is always captured so a failure can report it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::callback::CallbackChannel;
use super::sinks::{CaptureBuffer, OutputSink};
use crate::constants::callback;

/// Extension to launcher table; the executable path follows the launcher
const INTERPRETERS: &[(&str, &[&str])] = &[
    ("bat", &["cmd", "/C"]),
    ("cmd", &["cmd", "/C"]),
    ("ps1", &["powershell", "-File"]),
    ("sh", &["sh"]),
    ("py", &["python"]),
    ("groovy", &["groovy"]),
    ("go", &["go", "run"]),
];

/// How long output pumps may drain after a timed out action is killed
const PUMP_GRACE: Duration = Duration::from_secs(1);

/// Action failed to start, exited unsuccessfully, or timed out
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    /// Everything the child wrote to standard error
    pub stderr: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stderr: stderr.into(),
        }
    }
}

/// One invocation of an action
pub struct ExecutionRequest {
    /// Unique per invocation; names the callback pipe
    pub execution_id: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// `KEY=VALUE` entries added to the inherited environment
    pub env: Vec<String>,
    pub stdout: Option<Arc<dyn OutputSink>>,
    pub stderr: Option<Arc<dyn OutputSink>>,
}

impl std::fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("execution_id", &self.execution_id)
            .field("executable", &self.executable)
            .field("args", &self.args.len())
            .field("env", &self.env.len())
            .finish()
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run the action to completion and return its trimmed callback context
    async fn execute(&self, request: ExecutionRequest) -> Result<String, ExecutionError>;
}

/// Executes actions as local child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill actions that run longer than `timeout`
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    async fn run(&self, mut command: Command, request: &ExecutionRequest) -> Result<(), ExecutionError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ExecutionError::new(
                format!("could not start {}: {}", request.executable.display(), e),
                "",
            )
        })?;

        let stderr_capture = Arc::new(CaptureBuffer::new());
        let mut stderr_sinks: Vec<Arc<dyn OutputSink>> =
            vec![stderr_capture.clone() as Arc<dyn OutputSink>];
        stderr_sinks.extend(request.stderr.clone());

        let mut pumps: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(pump(out, request.stdout.clone().into_iter().collect()))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(pump(err, stderr_sinks))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!("⚠️ EXECUTOR: Could not kill timed out action: {}", e);
                    }
                    // grandchildren may still hold the output pipes
                    if tokio::time::timeout(PUMP_GRACE, join_pumps(&mut pumps)).await.is_err() {
                        pumps.iter().for_each(JoinHandle::abort);
                    }
                    return Err(ExecutionError::new(
                        format!("execution timed out after {}s", limit.as_secs()),
                        stderr_capture.text(),
                    ));
                }
            },
            None => child.wait().await,
        };
        join_pumps(&mut pumps).await;

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(ExecutionError::new(
                exit_message(status),
                stderr_capture.text(),
            )),
            Err(e) => Err(ExecutionError::new(e.to_string(), stderr_capture.text())),
        }
    }
}

#[async_trait]
impl ActionExecutor for ProcessExecutor {
    #[instrument(skip(self, request), fields(execution_id = %request.execution_id))]
    async fn execute(&self, request: ExecutionRequest) -> Result<String, ExecutionError> {
        let channel = CallbackChannel::open(&request.execution_id).map_err(|e| {
            ExecutionError::new(format!("could not create callback pipe: {e}"), "")
        })?;

        let mut command = build_command(&request.executable, &request.args, channel.path());
        command
            .envs(parse_env(&request.env))
            .env(callback::PIPE_ENV, channel.path());

        let start = Instant::now();
        let outcome = self.run(command, &request).await;
        let callback_context = channel.close().await;

        debug!(
            executable = %request.executable.display(),
            success = outcome.is_ok(),
            "EXECUTOR: Action finished in {:.3}s",
            start.elapsed().as_secs_f64()
        );

        outcome.map(|()| callback_context)
    }
}

fn interpreter_for(executable: &Path) -> Option<&'static [&'static str]> {
    let extension = executable.extension()?.to_str()?.to_ascii_lowercase();
    INTERPRETERS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, launcher)| *launcher)
}

fn build_command(executable: &Path, args: &[String], pipe_path: &str) -> Command {
    let mut command = match interpreter_for(executable) {
        Some([program, launcher_args @ ..]) => {
            let mut command = Command::new(program);
            command.args(launcher_args.iter()).arg(executable);
            command
        }
        _ => Command::new(executable),
    };
    command
        .args(args)
        .arg(callback::PIPE_ARG)
        .arg(pipe_path);
    command
}

fn parse_env(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                debug!(entry = %entry, "EXECUTOR: Ignoring malformed environment entry");
                None
            }
        })
        .collect()
}

fn exit_message(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => status.to_string(),
    }
}

async fn pump<R: AsyncRead + Unpin>(mut stream: R, sinks: Vec<Arc<dyn OutputSink>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for sink in &sinks {
                    if let Err(e) = sink.write_output(&chunk[..n]) {
                        warn!("⚠️ EXECUTOR: Could not write action output: {}", e);
                    }
                }
            }
            Err(e) => {
                debug!("EXECUTOR: Output stream closed with error: {}", e);
                break;
            }
        }
    }
}

async fn join_pumps(pumps: &mut [JoinHandle<()>]) {
    for pump in pumps.iter_mut() {
        if let Err(e) = pump.await {
            warn!("⚠️ EXECUTOR: Output pump failed: {}", e);
        }
    }
}
