use std::fs;
use std::os::unix::fs::PermissionsExt;

use assert_matches::assert_matches;
use mutation_gate::{Decision, DiffTag, MutationError, MutationGate, MutationOutcome};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn new_gate(root: &std::path::Path) -> MutationGate {
    MutationGate::new(root).expect("scope root should be valid")
}

#[test]
fn propose_then_approve_round_trips_content_with_newline_normalization() {
    let workspace = tempdir().expect("temp workspace");
    let gate = new_gate(workspace.path());

    let pending = gate
        .propose("notes.txt", "line1\nline2")
        .expect("propose should succeed");

    let added: Vec<_> = pending
        .diff()
        .lines()
        .iter()
        .filter(|line| line.tag == DiffTag::Added)
        .collect();
    assert_eq!(added.len(), 2);
    assert_eq!(added[0].new_line, Some(1));
    assert_eq!(added[1].new_line, Some(2));

    let outcome = gate
        .resolve(pending, Decision::Approve)
        .expect("approve should apply");
    assert_matches!(outcome, MutationOutcome::Applied { .. });

    let written = fs::read_to_string(workspace.path().join("notes.txt")).expect("read back");
    assert_eq!(written, "line1\nline2\n");
}

#[test]
fn decline_leaves_disk_untouched() {
    let workspace = tempdir().expect("temp workspace");
    let gate = new_gate(workspace.path());

    let pending = gate.propose("notes.txt", "content").expect("propose");
    let outcome = gate.resolve(pending, Decision::Decline).expect("decline");

    assert_eq!(outcome, MutationOutcome::Discarded);
    assert!(!workspace.path().join("notes.txt").exists());
}

#[test]
fn reproposing_applied_content_yields_zero_changed_lines() {
    let workspace = tempdir().expect("temp workspace");
    let gate = new_gate(workspace.path());

    let pending = gate.propose("notes.txt", "line1\nline2").expect("propose");
    gate.resolve(pending, Decision::AutoApproved).expect("apply");

    let again = gate.propose("notes.txt", "line1\nline2").expect("repropose");
    assert!(again.is_noop());
    assert_eq!(again.diff().changed_lines(), 0);
}

#[test]
fn declined_then_identical_proposal_produces_the_same_diff() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("notes.txt"), "stable\n").expect("seed file");
    let gate = new_gate(workspace.path());

    let first = gate.propose("notes.txt", "stable\n").expect("propose");
    assert!(first.is_noop());
    gate.resolve(first, Decision::Decline).expect("decline");

    let second = gate.propose("notes.txt", "stable\n").expect("repropose");
    assert_eq!(second.diff().changed_lines(), 0);
}

#[test]
fn approve_preserves_existing_permission_bits() {
    let workspace = tempdir().expect("temp workspace");
    let target = workspace.path().join("script.sh");
    fs::write(&target, "#!/bin/bash\necho old\n").expect("seed file");
    fs::set_permissions(&target, fs::Permissions::from_mode(0o755)).expect("chmod");

    let gate = new_gate(workspace.path());
    let pending = gate
        .propose("script.sh", "#!/bin/bash\necho new\n")
        .expect("propose");
    gate.resolve(pending, Decision::Approve).expect("apply");

    let mode = fs::metadata(&target).expect("metadata").permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);
    assert_eq!(
        fs::read_to_string(&target).expect("read back"),
        "#!/bin/bash\necho new\n"
    );
}

#[test]
fn propose_rejects_paths_outside_the_scope_root() {
    let outer = tempdir().expect("outer temp dir");
    let workspace_root = outer.path().join("workspace");
    fs::create_dir_all(&workspace_root).expect("create workspace root");

    let gate = new_gate(&workspace_root);
    let error = gate
        .propose("../escape.txt", "nope")
        .expect_err("escape must be rejected");
    assert_matches!(error, MutationError::ScopeEscape(_));

    let absolute = outer.path().join("absolute.txt");
    let error = gate
        .propose(absolute.to_str().expect("utf-8 path"), "nope")
        .expect_err("absolute escape must be rejected");
    assert_matches!(error, MutationError::ScopeEscape(_));
}

#[test]
fn propose_rejects_traversal_through_missing_directories() {
    let outer = tempdir().expect("outer temp dir");
    let workspace_root = outer.path().join("workspace");
    fs::create_dir_all(&workspace_root).expect("create workspace root");

    // Every ancestor containing the nonexistent segment fails `exists()`,
    // so only a lexical check can catch the traversal.
    let gate = new_gate(&workspace_root);
    let error = gate
        .propose("missing/../../evil.txt", "pwned")
        .expect_err("traversal through a missing directory must be rejected");
    assert_matches!(error, MutationError::ScopeEscape(_));
    assert!(!outer.path().join("evil.txt").exists());
}

#[test]
fn propose_accepts_traversal_that_stays_inside_scope() {
    let workspace = tempdir().expect("temp workspace");
    let gate = new_gate(workspace.path());

    let pending = gate
        .propose("nested/../notes.txt", "fine\n")
        .expect("in-scope traversal resolves");
    assert_eq!(pending.display_path(), std::path::Path::new("notes.txt"));

    gate.resolve(pending, Decision::Approve).expect("apply");
    assert_eq!(
        fs::read_to_string(workspace.path().join("notes.txt")).expect("read back"),
        "fine\n"
    );
}

#[test]
fn propose_rejects_symlink_targets_that_point_outside() {
    let outer = tempdir().expect("outer temp dir");
    let workspace_root = outer.path().join("workspace");
    fs::create_dir_all(&workspace_root).expect("create workspace root");

    let outside = outer.path().join("outside.txt");
    fs::write(&outside, "outside").expect("seed outside file");
    std::os::unix::fs::symlink(&outside, workspace_root.join("link.txt")).expect("symlink");

    let gate = new_gate(&workspace_root);
    let error = gate
        .propose("link.txt", "overwrite")
        .expect_err("symlink escape must be rejected");
    assert_matches!(error, MutationError::ScopeEscape(_));
}

#[test]
fn propose_rejects_binary_targets() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("blob.bin"), [0u8, 159, 146, 150]).expect("seed binary");

    let gate = new_gate(workspace.path());
    let error = gate
        .propose("blob.bin", "text")
        .expect_err("binary target must be refused");
    assert_matches!(error, MutationError::BinaryContent(_));
}

#[test]
fn approve_creates_missing_parent_directories_inside_scope() {
    let workspace = tempdir().expect("temp workspace");
    let gate = new_gate(workspace.path());

    let pending = gate
        .propose("nested/dir/file.txt", "deep\n")
        .expect("propose");
    gate.resolve(pending, Decision::Approve).expect("apply");

    assert_eq!(
        fs::read_to_string(workspace.path().join("nested/dir/file.txt")).expect("read back"),
        "deep\n"
    );
}
