//! Backend invoker: runs the external analysis program
//!
//! One invocation per call, bounded by the target's wall-clock timeout.
//! The child runs in its own process group so a timeout can take down
//! the whole tree, and stdout is expected to be a single JSON record.

use crate::config::RepositoryTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Cap on raw output retained in parse-failure diagnostics
const MAX_RAW_DIAGNOSTIC: usize = 4 * 1024;

/// Successful invocation payload
#[derive(Debug, Clone)]
pub struct BackendReply {
    /// Response text for the caller
    pub text: String,
    /// New continuity token to store for the conversation
    pub continuity: String,
    /// Cost/duration passthrough, not interpreted here
    pub metrics: InvokeMetrics,
}

/// Observability data reported by the backend
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvokeMetrics {
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u32>,
}

/// Classified invocation failure
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("backend exceeded its {timeout:?} budget")]
    Timeout { timeout: Duration },
    #[error("backend output was not a structured record: {message}")]
    Parse {
        message: String,
        /// Offending stdout, truncated for diagnostics
        raw: String,
    },
    #[error("backend reported an error: {message}")]
    BackendReported { message: String },
    #[error("failed to launch backend: {0}")]
    Launch(#[source] std::io::Error),
    #[error("backend ran but its output could not be collected: {0}")]
    Wait(#[source] std::io::Error),
}

/// The structured record the backend writes to stdout
#[derive(Debug, Deserialize)]
struct BackendRecord {
    result: String,
    session_id: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    num_turns: Option<u32>,
}

/// Seam for dispatch tests: the coordinator only sees this contract
#[async_trait]
pub trait Backend: Send + Sync {
    /// Perform exactly one invocation; never retries internally
    async fn invoke(
        &self,
        prompt: &str,
        continuity: Option<&str>,
        target: &RepositoryTarget,
    ) -> Result<BackendReply, InvokeError>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for std::sync::Arc<T> {
    async fn invoke(
        &self,
        prompt: &str,
        continuity: Option<&str>,
        target: &RepositoryTarget,
    ) -> Result<BackendReply, InvokeError> {
        (**self).invoke(prompt, continuity, target).await
    }
}

/// Production backend: the analysis CLI invoked as a child process
pub struct CliBackend {
    program: String,
}

impl CliBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Command-line contract: prompt, structured-output flag, turn
    /// budget, tool allowlist, and a resume directive when a continuity
    /// token exists.
    fn build_args(
        prompt: &str,
        continuity: Option<&str>,
        target: &RepositoryTarget,
    ) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--max-turns".to_string(),
            target.max_turns.to_string(),
        ];
        if !target.allowed_tools.is_empty() {
            args.push("--allowed-tools".to_string());
            args.push(target.allowed_tools.join(","));
        }
        if let Some(token) = continuity {
            args.push("--resume".to_string());
            args.push(token.to_string());
        }
        args
    }

    /// Kill the child's process group immediately with SIGKILL.
    #[cfg(unix)]
    fn kill_process_group(pid: Option<u32>) {
        let Some(pid) = pid else { return };
        let Ok(raw) = i32::try_from(pid) else { return };
        tracing::debug!(pgid = pid, "Sending SIGKILL to backend process group");
        let _ = killpg(Pid::from_raw(raw), Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    fn kill_process_group(_pid: Option<u32>) {
        // kill_on_drop is the only recourse on non-Unix platforms
    }

    fn parse_output(stdout: &str, stderr: &str, exit_code: i32) -> Result<BackendReply, InvokeError> {
        let record: BackendRecord = match serde_json::from_str(stdout.trim()) {
            Ok(r) => r,
            Err(e) => {
                return Err(InvokeError::Parse {
                    message: format!("{e} (exit code {exit_code})"),
                    raw: truncate_raw(if stdout.trim().is_empty() { stderr } else { stdout }),
                });
            }
        };

        if record.is_error {
            return Err(InvokeError::BackendReported {
                message: record.result,
            });
        }

        if exit_code != 0 {
            // Record parsed clean and did not flag an error; trust the
            // record but leave a trail for operators.
            tracing::warn!(exit_code, "Backend exited non-zero with a clean record");
        }

        Ok(BackendReply {
            text: record.result,
            continuity: record.session_id,
            metrics: InvokeMetrics {
                cost_usd: record.total_cost_usd,
                duration_ms: record.duration_ms,
                num_turns: record.num_turns,
            },
        })
    }
}

#[async_trait]
impl Backend for CliBackend {
    async fn invoke(
        &self,
        prompt: &str,
        continuity: Option<&str>,
        target: &RepositoryTarget,
    ) -> Result<BackendReply, InvokeError> {
        let args = Self::build_args(prompt, continuity, target);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .current_dir(&target.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // New process group so a timeout kill reaches all descendants
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .ok();
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(InvokeError::Launch)?;
        let pid = child.id();
        let timeout = target.timeout();

        tokio::select! {
            biased;

            () = tokio::time::sleep(timeout) => {
                Self::kill_process_group(pid);
                Err(InvokeError::Timeout { timeout })
            }

            result = child.wait_with_output() => {
                let output = result.map_err(InvokeError::Wait)?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code().unwrap_or(-1);
                Self::parse_output(&stdout, &stderr, exit_code)
            }
        }
    }
}

/// Keep the head of oversized raw output for diagnostics
fn truncate_raw(raw: &str) -> String {
    if raw.len() <= MAX_RAW_DIAGNOSTIC {
        return raw.to_string();
    }
    let head: String = raw.chars().take(MAX_RAW_DIAGNOSTIC).collect();
    format!(
        "{head}\n[truncated: got {} bytes, kept {MAX_RAW_DIAGNOSTIC}]",
        raw.len()
    )
}
