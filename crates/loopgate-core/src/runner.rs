//! Shell command execution with a hard timeout.
//!
//! Commands run through `sh -c` in their own process group. On timeout the
//! whole group gets SIGTERM, then SIGKILL after [`KILL_GRACE`]; after a normal
//! exit any leftover group members are killed so they cannot hold the output
//! pipes open past the timeout. Nothing here
//! returns an error: spawn failures and timeouts are reported as failed
//! [`CommandResult`]s.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long to keep draining pipes after the child has been killed.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

const MAX_OUTPUT: usize = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: CheckStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
}

/// Normalized view of a command result for callers that only care whether it
/// passed and what it printed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == -1 && self.stderr.contains("[Timeout: killed after")
    }

    pub fn outcome(&self) -> CheckOutcome {
        let passed = self.passed();
        let error = (!passed).then(|| {
            let stderr = self.stderr.trim();
            if stderr.is_empty() {
                format!("exit code {}", self.exit_code)
            } else {
                cap_tail(stderr).to_string()
            }
        });
        CheckOutcome {
            passed,
            output: combine_output(&self.stdout, &self.stderr),
            error,
        }
    }

    fn failure(stderr: String, elapsed: Duration) -> Self {
        Self {
            status: CheckStatus::Fail,
            stdout: String::new(),
            stderr,
            exit_code: -1,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Combine stdout/stderr and cap to 10KB, keeping the tail.
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    };
    cap_tail(output.trim()).to_string()
}

fn cap_tail(s: &str) -> &str {
    if s.len() <= MAX_OUTPUT {
        return s;
    }
    let mut start = s.len() - MAX_OUTPUT;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

pub async fn run_with_timeout(command: &str, cwd: &Path, timeout: Duration) -> CommandResult {
    run_command(command, cwd, None, timeout).await
}

/// Run `command` under `sh -c`, optionally feeding `input` on stdin.
pub async fn run_command(
    command: &str,
    cwd: &Path,
    input: Option<&str>,
    timeout: Duration,
) -> CommandResult {
    let started = Instant::now();
    tracing::debug!(command, cwd = %cwd.display(), timeout_ms = timeout.as_millis() as u64, "spawning");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(command, error = %e, "failed to spawn");
            return CommandResult::failure(format!("[Error: {e}]"), started.elapsed());
        }
    };

    if let (Some(mut stdin), Some(data)) = (child.stdin.take(), input) {
        let data = data.to_owned();
        tokio::spawn(async move {
            // The child may exit without reading; a broken pipe is expected then.
            let _ = stdin.write_all(data.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }

    let stdout_task = child.stdout.take().map(|mut r| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf).await;
            buf
        })
    });
    let stderr_task = child.stderr.take().map(|mut r| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf).await;
            buf
        })
    });

    let group = child.id();
    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            // Background jobs left in the group would hold the pipes open.
            kill_group(group);
            (status.code().unwrap_or(-1), false)
        }
        Ok(Err(e)) => {
            kill_group(group);
            return CommandResult::failure(format!("[Error: {e}]"), started.elapsed());
        }
        Err(_) => {
            tracing::warn!(command, timeout_ms = timeout.as_millis() as u64, "command timed out");
            terminate(&mut child).await;
            (-1, true)
        }
    };

    // Readers get whatever is left of the budget, and at least DRAIN_GRACE.
    let drain_budget = if timed_out {
        DRAIN_GRACE
    } else {
        timeout.saturating_sub(started.elapsed()).max(DRAIN_GRACE)
    };
    let drain = |task: Option<tokio::task::JoinHandle<Vec<u8>>>| async move {
        let Some(task) = task else {
            return String::new();
        };
        let bytes = match tokio::time::timeout(drain_budget, task).await {
            Ok(Ok(b)) => b,
            _ => {
                tracing::warn!("output pipe still open after the command exited, truncating");
                Vec::new()
            }
        };
        String::from_utf8_lossy(&bytes).into_owned()
    };
    let stdout = drain(stdout_task).await;
    let mut stderr = drain(stderr_task).await;

    if timed_out {
        stderr.push_str(&format!(
            "\n[Timeout: killed after {}ms]",
            timeout.as_millis()
        ));
    }

    let status = if !timed_out && exit_code == 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };

    CommandResult {
        status,
        stdout,
        stderr,
        exit_code,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // ESRCH when the group is already empty.
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// SIGTERM the process group, wait out the grace window, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let group = Pid::from_raw(pid as i32);
        let _ = killpg(group, Signal::SIGTERM);
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            // The shell is gone; make sure nothing it started outlives it.
            let _ = killpg(group, Signal::SIGKILL);
            return;
        }
        let _ = killpg(group, Signal::SIGKILL);
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
