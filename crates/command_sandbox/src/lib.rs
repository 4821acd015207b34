//! Sandboxed execution of a single shell command under resource ceilings.
//!
//! The sandbox knows nothing about conversation state. It validates a
//! command against a fixed denylist and path rules, then runs it in its own
//! process group with the working directory pinned to the scope root, a
//! wall-clock timeout, and independent per-stream output truncation. A
//! non-zero exit is a normal, reportable outcome, never a sandbox failure.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use wait_timeout::ChildExt;

pub const DEFAULT_TIMEOUT_SEC: u64 = 30;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 20_000;

const WAIT_POLL: Duration = Duration::from_millis(50);

/// Substrings that make a command unconditionally rejected.
///
/// Matched case-insensitively against the whole command string.
pub const DENYLIST: &[&str] = &[
    "rm -rf",
    "sudo",
    "chmod",
    "chown",
    "chgrp",
    "mkfs",
    "shutdown",
    "reboot",
    "systemctl",
    "kill",
    "|&",
    ";&",
    ":>",
];

/// Why `validate` refused a command. The command was never spawned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("empty command")]
    Empty,

    #[error("command contains disallowed operation '{needle}'")]
    Denylisted { needle: &'static str },

    #[error("absolute or parent-directory path '{token}' is not allowed")]
    PathToken { token: String },

    #[error(".git references are not permitted in commands: '{token}'")]
    GitToken { token: String },
}

/// A single shell command bound to the scope root it must run inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub scope_root: PathBuf,
}

impl CommandRequest {
    #[must_use]
    pub fn new(command: impl Into<String>, scope_root: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            scope_root: scope_root.into(),
        }
    }
}

/// Resource ceilings for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SEC),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Normal termination with an exit code (zero or not).
    Exited(i32),
    /// Terminated by a signal other than our timeout kill.
    Signaled,
    /// Killed by the sandbox after the wall-clock timeout expired.
    TimedOut,
}

/// Transcript of one execution. Output may be truncated; truncation is
/// flagged per stream, never silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    pub outcome: CommandOutcome,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

impl CommandResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcome == CommandOutcome::Exited(0)
    }

    /// Renders the transcript in the shape tool results use.
    #[must_use]
    pub fn render(&self) -> String {
        let status = match self.outcome {
            CommandOutcome::Exited(code) => format!("exit_code={code}"),
            CommandOutcome::Signaled => "exit_code=terminated_by_signal".to_string(),
            CommandOutcome::TimedOut => format!("timeout after {}s", self.elapsed.as_secs()),
        };

        let mut sections = vec![format!("status: {status}")];
        if !self.stdout.is_empty() {
            sections.push(format!("stdout:\n{}", self.stdout.trim_end()));
        }
        if !self.stderr.is_empty() {
            sections.push(format!("stderr:\n{}", self.stderr.trim_end()));
        }
        if self.stdout_truncated || self.stderr_truncated {
            sections.push("[output truncated]".to_string());
        }

        sections.join("\n")
    }
}

/// Failures of the sandbox itself, distinct from command outcomes.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Rejected(#[from] RejectionReason),

    #[error("scope root {0} is not an existing directory")]
    ScopeRootMissing(PathBuf),

    #[error("failed to launch command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed waiting for command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("command interrupted by operator")]
    Interrupted,
}

/// Checks a command against the sandbox rules without spawning anything.
pub fn validate(command: &str) -> Result<(), RejectionReason> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(RejectionReason::Empty);
    }

    let lowered = trimmed.to_lowercase();
    for needle in DENYLIST {
        if lowered.contains(needle) {
            return Err(RejectionReason::Denylisted { needle });
        }
    }

    for token in trimmed.split_whitespace() {
        if token.starts_with('/') || token.starts_with("..") {
            return Err(RejectionReason::PathToken {
                token: token.to_string(),
            });
        }
        if token.contains(".git") {
            return Err(RejectionReason::GitToken {
                token: token.to_string(),
            });
        }
    }

    Ok(())
}

/// Validates and executes one command inside the scope root.
///
/// The child runs in its own process group; on timeout or interrupt the
/// whole group is killed so no grandchildren survive. `cancel` is polled
/// between waits and maps to [`SandboxError::Interrupted`].
pub fn execute(
    request: &CommandRequest,
    limits: Limits,
    cancel: &AtomicBool,
) -> Result<CommandResult, SandboxError> {
    validate(&request.command)?;

    if !request.scope_root.is_dir() {
        return Err(SandboxError::ScopeRootMissing(request.scope_root.clone()));
    }

    let started = Instant::now();
    let mut child = Command::new("bash")
        .arg("-lc")
        .arg(&request.command)
        .current_dir(&request.scope_root)
        .env("LC_ALL", "C")
        .env("LANG", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(SandboxError::Spawn)?;

    let child_pid = child.id() as i32;
    let stdout_reader = spawn_limited_reader(child.stdout.take(), limits.max_output_bytes);
    let stderr_reader = spawn_limited_reader(child.stderr.take(), limits.max_output_bytes);

    let deadline = started + limits.timeout;
    let mut timed_out = false;
    let status = loop {
        if cancel.load(Ordering::SeqCst) {
            kill_group(child_pid);
            let _ = child.wait();
            join_reader(stdout_reader);
            join_reader(stderr_reader);
            return Err(SandboxError::Interrupted);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            kill_group(child_pid);
            let status = child.wait().map_err(SandboxError::Wait)?;
            timed_out = true;
            break status;
        }

        match child
            .wait_timeout(remaining.min(WAIT_POLL))
            .map_err(SandboxError::Wait)?
        {
            Some(status) => break status,
            None => continue,
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_reader);
    let (stderr, stderr_truncated) = join_reader(stderr_reader);

    let outcome = if timed_out {
        CommandOutcome::TimedOut
    } else {
        match status.code() {
            Some(code) => CommandOutcome::Exited(code),
            None => CommandOutcome::Signaled,
        }
    };

    Ok(CommandResult {
        command: request.command.clone(),
        outcome,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        elapsed: started.elapsed(),
    })
}

fn kill_group(pid: i32) {
    // Negative pid is unnecessary with killpg; the child was made its own
    // group leader via process_group(0), so its pid is the pgid.
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
    }
}

fn spawn_limited_reader(
    pipe: Option<impl Read + Send + 'static>,
    limit: usize,
) -> Option<JoinHandle<(Vec<u8>, bool)>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut kept = Vec::new();
        let mut truncated = false;
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if kept.len() < limit {
                        let take = n.min(limit - kept.len());
                        kept.extend_from_slice(&buf[..take]);
                        if take < n {
                            truncated = true;
                        }
                    } else {
                        truncated = true;
                    }
                    // Keep draining past the limit so the child never blocks
                    // on a full pipe.
                }
            }
        }
        (kept, truncated)
    }))
}

fn join_reader(handle: Option<JoinHandle<(Vec<u8>, bool)>>) -> (String, bool) {
    let Some(handle) = handle else {
        return (String::new(), false);
    };

    match handle.join() {
        Ok((bytes, truncated)) => (lossy_at_char_boundary(bytes), truncated),
        Err(_) => (String::new(), false),
    }
}

fn lossy_at_char_boundary(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(error) => {
            let bytes = error.into_bytes();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{validate, RejectionReason};

    #[test]
    fn validate_rejects_empty_and_blank_commands() {
        assert_eq!(validate(""), Err(RejectionReason::Empty));
        assert_eq!(validate("   \t"), Err(RejectionReason::Empty));
    }

    #[test]
    fn validate_rejects_denylisted_substrings_case_insensitively() {
        assert!(matches!(
            validate("sudo apt install"),
            Err(RejectionReason::Denylisted { needle: "sudo" })
        ));
        assert!(matches!(
            validate("RM -RF target"),
            Err(RejectionReason::Denylisted { needle: "rm -rf" })
        ));
        assert!(matches!(
            validate("systemctl restart sshd"),
            Err(RejectionReason::Denylisted { .. })
        ));
    }

    #[test]
    fn validate_rejects_absolute_and_parent_paths() {
        assert!(matches!(
            validate("cat /etc/passwd"),
            Err(RejectionReason::PathToken { .. })
        ));
        assert!(matches!(
            validate("cat ../etc/passwd"),
            Err(RejectionReason::PathToken { .. })
        ));
    }

    #[test]
    fn validate_rejects_git_directory_references() {
        assert!(matches!(
            validate("ls .git/objects"),
            Err(RejectionReason::GitToken { .. })
        ));
    }

    #[test]
    fn validate_accepts_ordinary_relative_commands() {
        assert_eq!(validate("ls -la src"), Ok(()));
        assert_eq!(validate("grep -rn TODO notes"), Ok(()));
    }
}
