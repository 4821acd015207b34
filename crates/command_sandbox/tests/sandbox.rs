use std::sync::atomic::AtomicBool;
use std::time::Duration;

use command_sandbox::{
    execute, CommandOutcome, CommandRequest, Limits, RejectionReason, SandboxError,
};
use tempfile::tempdir;

fn no_cancel() -> AtomicBool {
    AtomicBool::new(false)
}

#[test]
fn successful_command_reports_exit_zero_and_output() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new("printf 'sandbox-ok'", workspace.path());

    let result = execute(&request, Limits::default(), &no_cancel()).expect("command should run");

    assert_eq!(result.outcome, CommandOutcome::Exited(0));
    assert!(result.success());
    assert_eq!(result.stdout, "sandbox-ok");
    assert!(!result.stdout_truncated);
    assert!(result.render().contains("exit_code=0"));
}

#[test]
fn non_zero_exit_is_a_normal_outcome_not_an_error() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new("echo boom 1>&2; exit 7", workspace.path());

    let result = execute(&request, Limits::default(), &no_cancel()).expect("command should run");

    assert_eq!(result.outcome, CommandOutcome::Exited(7));
    assert!(!result.success());
    assert!(result.stderr.contains("boom"));
}

#[test]
fn command_runs_with_scope_root_as_working_directory() {
    let workspace = tempdir().expect("temp workspace");
    std::fs::write(workspace.path().join("marker.txt"), "present").expect("write marker");

    let request = CommandRequest::new("cat marker.txt", workspace.path());
    let result = execute(&request, Limits::default(), &no_cancel()).expect("command should run");

    assert_eq!(result.stdout, "present");
}

#[test]
fn denylisted_command_is_rejected_before_spawn() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new("sudo ls", workspace.path());

    let error = execute(&request, Limits::default(), &no_cancel())
        .expect_err("denylisted command must not run");

    assert!(matches!(
        error,
        SandboxError::Rejected(RejectionReason::Denylisted { needle: "sudo" })
    ));
}

#[test]
fn parent_traversal_is_rejected_before_spawn() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new("cat ../etc/passwd", workspace.path());

    let error = execute(&request, Limits::default(), &no_cancel())
        .expect_err("escaping command must not run");

    assert!(matches!(
        error,
        SandboxError::Rejected(RejectionReason::PathToken { .. })
    ));
}

#[test]
fn timeout_kills_the_command_and_reports_timed_out() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new("sleep 10", workspace.path());
    let limits = Limits {
        timeout: Duration::from_secs(1),
        max_output_bytes: command_sandbox::DEFAULT_MAX_OUTPUT_BYTES,
    };

    let result = execute(&request, limits, &no_cancel()).expect("timeout is a reported outcome");

    assert_eq!(result.outcome, CommandOutcome::TimedOut);
    assert!(
        result.elapsed < Duration::from_secs(3),
        "timeout should fire near the deadline, took {:?}",
        result.elapsed
    );
    assert!(result.render().contains("timeout"));
}

#[test]
fn timeout_kills_the_whole_process_group_including_grandchildren() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new(
        "sleep 30 & echo $! > grandchild.pid; wait",
        workspace.path(),
    );
    let limits = Limits {
        timeout: Duration::from_secs(1),
        max_output_bytes: command_sandbox::DEFAULT_MAX_OUTPUT_BYTES,
    };

    let result = execute(&request, limits, &no_cancel()).expect("timeout is a reported outcome");
    assert_eq!(result.outcome, CommandOutcome::TimedOut);

    let pid: i32 = std::fs::read_to_string(workspace.path().join("grandchild.pid"))
        .expect("grandchild pid recorded")
        .trim()
        .parse()
        .expect("pid parses");

    // SIGKILL delivery is prompt but reaping is not; poll briefly.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if unsafe { libc::kill(pid, 0) } != 0 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "grandchild {pid} survived the group kill"
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn stdout_is_truncated_at_the_byte_limit_with_a_flag() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new("yes x | head -c 5000", workspace.path());
    let limits = Limits {
        timeout: Duration::from_secs(10),
        max_output_bytes: 512,
    };

    let result = execute(&request, limits, &no_cancel()).expect("command should run");

    assert_eq!(result.outcome, CommandOutcome::Exited(0));
    assert_eq!(result.stdout.len(), 512);
    assert!(result.stdout_truncated);
    assert!(!result.stderr_truncated);
    assert!(result.render().contains("[output truncated]"));
}

#[test]
fn streams_are_truncated_independently() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new("printf short; { yes e | head -c 5000; } 1>&2", workspace.path());
    let limits = Limits {
        timeout: Duration::from_secs(10),
        max_output_bytes: 256,
    };

    let result = execute(&request, limits, &no_cancel()).expect("command should run");

    assert_eq!(result.stdout, "short");
    assert!(!result.stdout_truncated);
    assert!(result.stderr_truncated);
}

#[test]
fn pre_set_cancel_flag_interrupts_the_command() {
    let workspace = tempdir().expect("temp workspace");
    let request = CommandRequest::new("sleep 10", workspace.path());
    let cancel = AtomicBool::new(true);

    let error = execute(&request, Limits::default(), &cancel)
        .expect_err("cancelled command must not complete");

    assert!(matches!(error, SandboxError::Interrupted));
}

#[test]
fn missing_scope_root_is_a_sandbox_error() {
    let workspace = tempdir().expect("temp workspace");
    let missing = workspace.path().join("gone");
    let request = CommandRequest::new("true", &missing);

    let error = execute(&request, Limits::default(), &no_cancel()).expect_err("must not run");
    assert!(matches!(error, SandboxError::ScopeRootMissing(path) if path == missing));
}
