//! Process executor: one agent CLI run from spawn to classified result.
//!
//! The child leads its own process group so that timeouts and cancellation
//! can take down anything it spawned. stdout and stderr are read by
//! background tasks into shared buffers, which is what lets a timed-out run
//! still report the output it produced before it was killed.

pub mod reaper;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{self, Adapter};
use crate::limits::apply_limit;
use crate::result::{AgentResult, AgentStatus, INFRA_RETURNCODE};
use crate::signals;
use reaper::GroupSignal;

/// Grace period between SIGTERM and SIGKILL on timeout.
pub const TERM_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on waiting for the reader tasks once the child is gone.
/// Grandchildren holding the pipes open must not hang the call.
pub const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

/// One resolved execution, produced by the dispatcher after validation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub cwd: PathBuf,
    pub prompt: String,
    pub thinking: bool,
    pub timeout: Duration,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub agent_index: usize,
}

/// A fully built subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Complete child environment; nothing else is inherited.
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    /// Lowercase stderr substrings that mark an authentication failure.
    pub auth_patterns: Vec<String>,
    pub auth_message: String,
    /// Name used in "not found" errors.
    pub label: String,
    pub agent_index: usize,
}

impl CommandSpec {
    /// The invocation for `request` against `adapter`, with the adapter's
    /// environment whitelist applied to the current process environment.
    pub fn for_adapter(adapter: Adapter, request: &ExecutionRequest) -> crate::error::BridgeResult<Self> {
        let descriptor = adapter.descriptor();
        let argv = adapter.build_command(
            &request.prompt,
            request.thinking,
            request.model.as_deref(),
            request.reasoning_effort.as_deref(),
        )?;
        Ok(Self {
            argv,
            cwd: request.cwd.clone(),
            env: adapters::safe_env(descriptor),
            timeout: request.timeout,
            auth_patterns: descriptor
                .auth_patterns
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            auth_message: descriptor.auth_message.to_owned(),
            label: descriptor.name.to_owned(),
            agent_index: request.agent_index,
        })
    }
}

/// Character budgets applied to finished results.
#[derive(Debug, Clone, Copy)]
pub struct OutputLimits {
    pub max_output_chars: usize,
    pub timeout_tail_chars: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_output_chars: 120_000,
            timeout_tail_chars: 20_000,
        }
    }
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

fn take_text(buf: &SharedBuf) -> String {
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner));
    String::from_utf8_lossy(&bytes).into_owned()
}

fn spawn_reader<R>(reader: Option<R>, buf: SharedBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    })
}

/// Wait for both readers, but never longer than `limit`.
async fn drain(stdout: &mut JoinHandle<()>, stderr: &mut JoinHandle<()>, limit: Duration) {
    let joined = tokio::time::timeout(limit, async {
        let _ = (&mut *stdout).await;
        let _ = (&mut *stderr).await;
    })
    .await;
    if joined.is_err() {
        debug!("output drain timed out; keeping what was read");
        stdout.abort();
        stderr.abort();
    }
}

enum Outcome {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn spawn_error_text(label: &str, err: &std::io::Error) -> String {
    match err.kind() {
        ErrorKind::NotFound => format!("{label} CLI not found or not executable"),
        ErrorKind::PermissionDenied => format!("Permission denied: {err}"),
        _ => format!("Failed to start process: {err}"),
    }
}

/// Runs agent subprocesses and classifies how they ended.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    limits: OutputLimits,
    term_grace: Duration,
    drain_timeout: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(OutputLimits::default())
    }
}

impl ProcessExecutor {
    pub const fn new(limits: OutputLimits) -> Self {
        Self {
            limits,
            term_grace: TERM_GRACE,
            drain_timeout: IO_DRAIN_TIMEOUT,
        }
    }

    /// Override the SIGTERM-to-SIGKILL grace period.
    #[must_use]
    pub const fn with_term_grace(mut self, grace: Duration) -> Self {
        self.term_grace = grace;
        self
    }

    pub const fn limits(&self) -> &OutputLimits {
        &self.limits
    }

    /// Build the adapter's command for `request` and run it.
    pub async fn run(
        &self,
        adapter: Adapter,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> AgentResult {
        match CommandSpec::for_adapter(adapter, request) {
            Ok(spec) => self.run_command(spec, cancel).await,
            Err(e) => AgentResult::infra_error(request.agent_index, e.to_string(), 0),
        }
    }

    /// Run one prepared command to a terminal state.
    ///
    /// Successful runs get quality signals attached. Every result passes the
    /// output governor: tail-only for timeouts, combined otherwise.
    pub async fn run_command(&self, spec: CommandSpec, cancel: &CancellationToken) -> AgentResult {
        let result = self.execute(&spec, cancel).await;
        let result = if result.status == AgentStatus::Success {
            let found = signals::extract(&result.output, result.stderr.as_deref());
            if found.is_empty() {
                result
            } else {
                let value = serde_json::to_value(&found).unwrap_or_default();
                result.with_raw_entry("quality_signals", value)
            }
        } else {
            result
        };
        if result.status == AgentStatus::Timeout {
            apply_limit(result, self.limits.timeout_tail_chars, true)
        } else {
            apply_limit(result, self.limits.max_output_chars, false)
        }
    }

    async fn execute(&self, spec: &CommandSpec, cancel: &CancellationToken) -> AgentResult {
        let index = spec.agent_index;
        if cancel.is_cancelled() {
            return AgentResult::cancelled(index);
        }
        let start = Instant::now();
        let Some((program, args)) = spec.argv.split_first() else {
            return AgentResult::infra_error(index, "Failed to start process: empty command", 0);
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let text = spawn_error_text(&spec.label, &e);
                error!(agent_index = index, error = %e, "{text}");
                return AgentResult::infra_error(index, text, elapsed_ms(start));
            }
        };
        let Some(pid) = child.id() else {
            return AgentResult::infra_error(index, "Failed to start process: no pid", elapsed_ms(start));
        };
        let mut tracked = reaper::track(pid);
        debug!(agent_index = index, pid, program = %program, "agent spawned");

        let stdout_buf = SharedBuf::default();
        let stderr_buf = SharedBuf::default();
        let mut stdout_task = spawn_reader(child.stdout.take(), Arc::clone(&stdout_buf));
        let mut stderr_task = spawn_reader(child.stderr.take(), Arc::clone(&stderr_buf));

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status),
                Err(e) => Outcome::WaitFailed(e),
            },
            () = tokio::time::sleep(spec.timeout) => {
                reaper::signal_group(pid, GroupSignal::Terminate);
                let leader_exited = tokio::time::timeout(self.term_grace, child.wait()).await.is_ok();
                // Members that ignored SIGTERM outlive the leader.
                reaper::signal_group(pid, GroupSignal::Kill);
                if !leader_exited {
                    let _ = child.start_kill();
                    let _ = tokio::time::timeout(self.drain_timeout, child.wait()).await;
                }
                Outcome::TimedOut
            }
            () = cancel.cancelled() => {
                reaper::signal_group(pid, GroupSignal::Kill);
                let _ = child.start_kill();
                Outcome::Cancelled
            }
        };

        tracked.disarm();

        match outcome {
            Outcome::Cancelled => {
                stdout_task.abort();
                stderr_task.abort();
                info!(agent_index = index, pid, "agent cancelled");
                AgentResult {
                    duration_ms: elapsed_ms(start),
                    ..AgentResult::cancelled(index)
                }
            }
            Outcome::TimedOut => {
                drain(&mut stdout_task, &mut stderr_task, self.drain_timeout).await;
                let secs = spec.timeout.as_secs();
                warn!(agent_index = index, pid, timeout_secs = secs, "agent timed out");
                AgentResult {
                    status: AgentStatus::Timeout,
                    output: take_text(&stdout_buf),
                    stderr: non_empty(take_text(&stderr_buf)),
                    returncode: INFRA_RETURNCODE,
                    duration_ms: elapsed_ms(start),
                    agent_index: index,
                    message: Some(format!("Timed out after {secs}s")),
                    raw: None,
                    request_id: None,
                }
            }
            Outcome::WaitFailed(e) => {
                reaper::signal_group(pid, GroupSignal::Kill);
                let _ = child.start_kill();
                stdout_task.abort();
                stderr_task.abort();
                error!(agent_index = index, pid, error = %e, "agent failed");
                AgentResult::infra_error(index, e.to_string(), elapsed_ms(start))
            }
            Outcome::Exited(status) => {
                drain(&mut stdout_task, &mut stderr_task, self.drain_timeout).await;
                let output = take_text(&stdout_buf);
                let stderr = non_empty(take_text(&stderr_buf));
                let returncode = status.code().unwrap_or(INFRA_RETURNCODE);
                let auth_failed = stderr.as_deref().is_some_and(|text| {
                    let lowered = text.to_lowercase();
                    spec.auth_patterns.iter().any(|p| lowered.contains(p.as_str()))
                });
                let (status, message) = if auth_failed {
                    (AgentStatus::AuthError, Some(spec.auth_message.clone()))
                } else if status.success() {
                    (AgentStatus::Success, None)
                } else {
                    (AgentStatus::Error, None)
                };
                info!(agent_index = index, pid, returncode, status = %status, "agent completed");
                AgentResult {
                    status,
                    output,
                    stderr,
                    returncode,
                    duration_ms: elapsed_ms(start),
                    agent_index: index,
                    message,
                    raw: None,
                    request_id: None,
                }
            }
        }
    }
}
