//! Execution Engine - Abstraction for Code Execution
//!
//! **Core Responsibility:**
//! Run one submission once against one mocked stdin stream and capture its
//! output.
//!
//! **Critical Architectural Boundary:**
//! - Engine knows HOW to execute (child process, Docker container)
//! - Engine does NOT know expected outputs
//! - Engine does NOT evaluate correctness
//! - Engine returns the raw capture for the Evaluator to judge
//!
//! Every call gets a fresh interpreter, so no state survives between calls.
//! Output produced before a fault, a timeout or a limit violation is discarded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{EngineBackend, RuntimeConfig};
use crate::docker::DockerEngine;
use crate::runner::{
    stdout_capture_limit, BoundedBuffer, RunnerOutput, RunnerPayload, PAYLOAD_ENV, RUNNER_SCRIPT,
    STDERR_CAPTURE_BYTES,
};

/// Safety limits to keep pathological submissions away from the sandbox
pub const MAX_SOURCE_CODE_BYTES: usize = 48 * 1024;
pub const MAX_STDIN_BYTES: usize = 16 * 1024;

/// Why an execution produced no output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExecutionError {
    /// The submission raised or crashed
    Fault { message: String },
    Timeout { limit_ms: u64 },
    OutputLimit { limit_bytes: usize },
    MemoryLimit,
    /// The sandbox itself failed or refused the submission
    Sandbox { message: String },
}

impl ExecutionError {
    pub fn reason(&self) -> &'static str {
        match self {
            ExecutionError::Fault { .. } => "fault",
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::OutputLimit { .. } => "output_limit",
            ExecutionError::MemoryLimit => "memory_limit",
            ExecutionError::Sandbox { .. } => "sandbox",
        }
    }

    pub(crate) fn sandbox(error: anyhow::Error) -> Self {
        ExecutionError::Sandbox {
            message: format!("{:#}", error),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Fault { message } => write!(f, "{}", message),
            ExecutionError::Timeout { limit_ms } => {
                write!(f, "execution timed out after {}ms", limit_ms)
            }
            ExecutionError::OutputLimit { limit_bytes } => {
                write!(f, "output exceeded {} bytes", limit_bytes)
            }
            ExecutionError::MemoryLimit => write!(f, "memory limit exceeded"),
            ExecutionError::Sandbox { message } => write!(f, "sandbox error: {}", message),
        }
    }
}

/// Result of one `execute` call. `outcome` holds the captured stdout, or the
/// error and no output at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub outcome: std::result::Result<String, ExecutionError>,
    pub execution_time_ms: u64,
}

impl Execution {
    pub fn completed(stdout: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            outcome: Ok(stdout.into()),
            execution_time_ms,
        }
    }

    pub fn failed(error: ExecutionError, execution_time_ms: u64) -> Self {
        Self {
            outcome: Err(error),
            execution_time_ms,
        }
    }

    pub fn stdout(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.outcome.as_ref().err()
    }
}

/// The one-shot line source a submission reads with `input()`. Reads past
/// the end return empty text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StdinLines(Vec<String>);

impl StdinLines {
    pub fn new(lines: Vec<String>) -> Self {
        Self(lines)
    }

    /// Trim the text and split it into lines; empty text yields no lines.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        Self(trimmed.lines().map(str::to_string).collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.0.iter().map(|line| line.len() + 1).sum()
    }
}

/// Reject inputs that must never reach the sandbox.
pub fn check_limits(code: &str, stdin: &StdinLines) -> std::result::Result<(), ExecutionError> {
    if code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(ExecutionError::Sandbox {
            message: format!("source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES),
        });
    }
    if stdin.total_bytes() > MAX_STDIN_BYTES {
        return Err(ExecutionError::Sandbox {
            message: format!("stdin exceeds maximum size of {} bytes", MAX_STDIN_BYTES),
        });
    }
    Ok(())
}

/// Runs a submission once. Implementations never fail the call: every
/// problem, including their own infrastructure failures, is reported through
/// [`Execution::outcome`].
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, code: &str, stdin: &StdinLines) -> Execution;
}

/// Build the engine selected by `backend`.
pub fn build_engine(backend: EngineBackend, config: &RuntimeConfig) -> Result<Arc<dyn ExecutionEngine>> {
    let engine: Arc<dyn ExecutionEngine> = match backend {
        EngineBackend::Process => Arc::new(ProcessEngine::new(config.clone())),
        EngineBackend::Docker => Arc::new(DockerEngine::new(config.clone())?),
    };
    info!(backend = %backend, timeout_ms = config.timeout_ms, "Execution engine ready");
    Ok(engine)
}

/// Runs each submission in a child interpreter process.
///
/// The child is killed when the wall-clock timeout fires. Memory is bounded
/// by the runner itself where the platform allows it, and the host never
/// buffers more of the child's stdout or stderr than their caps.
pub struct ProcessEngine {
    config: RuntimeConfig,
}

impl ProcessEngine {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    async fn run(&self, code: &str, stdin: &StdinLines) -> Result<RunnerOutput> {
        let payload = RunnerPayload::new(code, stdin, self.config.max_output_bytes)
            .with_memory_limit(self.config.memory_limit_mb);
        let payload = serde_json::to_vec(&payload).context("Failed to encode runner payload")?;

        let mut child = Command::new(&self.config.interpreter)
            .args(["-I", "-c", RUNNER_SCRIPT])
            .env_remove(PAYLOAD_ENV)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.config.interpreter))?;

        let mut pipe = child.stdin.take().context("Interpreter stdin not captured")?;
        pipe.write_all(&payload)
            .await
            .context("Failed to send payload to interpreter")?;
        drop(pipe);

        let stdout = child.stdout.take().context("Interpreter stdout not captured")?;
        let stderr = child.stderr.take().context("Interpreter stderr not captured")?;

        // stderr keeps draining past its cap so the child never blocks on it
        let stderr_task = tokio::spawn(read_bounded(stderr, STDERR_CAPTURE_BYTES, false));
        let stdout = read_bounded(
            stdout,
            stdout_capture_limit(self.config.max_output_bytes),
            true,
        )
        .await
        .context("Failed to read interpreter stdout")?;

        if stdout.overflowed() {
            warn!(limit = stdout.len(), "Runner stdout over capacity, killing interpreter");
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Interpreter already gone");
            }
        }

        let status = child.wait().await.context("Failed to wait for interpreter")?;
        let stderr = stderr_task
            .await
            .context("Interpreter stderr reader stopped")?
            .context("Failed to read interpreter stderr")?;

        Ok(RunnerOutput {
            stdout,
            stderr,
            exit_code: status.code().map(i64::from),
        })
    }
}

/// Read `reader` into a buffer holding at most `limit` bytes. With
/// `stop_on_overflow` the read ends at the first byte past the limit,
/// otherwise the excess is consumed and dropped until end of stream.
async fn read_bounded<R>(mut reader: R, limit: usize, stop_on_overflow: bool) -> std::io::Result<BoundedBuffer>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BoundedBuffer::new(limit);
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.push(&chunk[..read]);
        if stop_on_overflow && buffer.overflowed() {
            break;
        }
    }
    Ok(buffer)
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(&self, code: &str, stdin: &StdinLines) -> Execution {
        if let Err(e) = check_limits(code, stdin) {
            warn!(error = %e, "Submission rejected before execution");
            return Execution::failed(e, 0);
        }

        let start_time = Instant::now();
        let timeout_duration = Duration::from_millis(self.config.timeout_ms);

        // Dropping the run future on timeout drops the child, which kills it
        let timeout_result = tokio::time::timeout(timeout_duration, self.run(code, stdin)).await;
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        let outcome = match timeout_result {
            Ok(Ok(output)) => output.into_outcome(self.config.max_output_bytes),
            Ok(Err(e)) => {
                warn!(error = %e, "Process engine failure");
                Err(ExecutionError::sandbox(e))
            }
            Err(_) => {
                warn!(timeout_ms = self.config.timeout_ms, "Execution timed out");
                Err(ExecutionError::Timeout {
                    limit_ms: self.config.timeout_ms,
                })
            }
        };

        debug!(
            execution_time_ms,
            reason = outcome.as_ref().err().map(ExecutionError::reason).unwrap_or("ok"),
            "Process execution finished"
        );

        Execution {
            outcome,
            execution_time_ms,
        }
    }
}
