//! The only path by which file content reaches disk.
//!
//! A proposed write becomes a [`PendingMutation`] carrying the rendered line
//! diff; nothing touches disk until the pending mutation is resolved with an
//! explicit decision. Approved content is written atomically (temp file plus
//! rename) preserving the original permission bits, and is normalized to end
//! with exactly one trailing newline. Scope containment is re-validated here
//! even though callers already checked it: the gate is the last line of
//! defense.

mod diff;
mod error;

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

pub use diff::{DiffLine, DiffTag, FileDiff, DEFAULT_CONTEXT_LINES};
pub use error::MutationError;

/// Operator (or policy) verdict on a pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline,
    /// Approved without a prompt: session authorization was granted or the
    /// instruction unambiguously implied the write.
    AutoApproved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied { path: PathBuf },
    Discarded,
}

/// An in-flight proposal to replace one file's content.
///
/// Created by [`MutationGate::propose`], destroyed by
/// [`MutationGate::resolve`]. Holds no file handles; discarding it has no
/// filesystem effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    target: PathBuf,
    display_path: PathBuf,
    current: String,
    proposed: String,
    diff: FileDiff,
}

impl PendingMutation {
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Scope-relative path for display.
    #[must_use]
    pub fn display_path(&self) -> &Path {
        &self.display_path
    }

    #[must_use]
    pub fn current_content(&self) -> &str {
        &self.current
    }

    /// Proposed content after trailing-newline normalization.
    #[must_use]
    pub fn proposed_content(&self) -> &str {
        &self.proposed
    }

    #[must_use]
    pub fn diff(&self) -> &FileDiff {
        &self.diff
    }

    /// True when the proposal would change nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.diff.is_empty()
    }
}

pub struct MutationGate {
    scope_root: PathBuf,
    context_lines: usize,
}

impl MutationGate {
    pub fn new(scope_root: impl Into<PathBuf>) -> Result<Self, MutationError> {
        Self::with_context_lines(scope_root, DEFAULT_CONTEXT_LINES)
    }

    pub fn with_context_lines(
        scope_root: impl Into<PathBuf>,
        context_lines: usize,
    ) -> Result<Self, MutationError> {
        let scope_root = scope_root.into();
        let canonical = scope_root
            .canonicalize()
            .map_err(|_| MutationError::InvalidScopeRoot(scope_root.clone()))?;
        if !canonical.is_dir() {
            return Err(MutationError::InvalidScopeRoot(scope_root));
        }

        Ok(Self {
            scope_root: canonical,
            context_lines,
        })
    }

    #[must_use]
    pub fn scope_root(&self) -> &Path {
        &self.scope_root
    }

    /// Computes the diff for a proposed write without touching disk.
    ///
    /// The current content is read from the target (empty when the file does
    /// not exist yet); non-UTF-8 targets are refused. The proposed content is
    /// normalized to a single trailing newline before diffing so that
    /// re-proposing what is already on disk yields zero changed lines.
    pub fn propose(&self, path: &str, new_content: &str) -> Result<PendingMutation, MutationError> {
        let target = self.resolve_write_target(path)?;
        let current = self.read_current(&target)?;
        let proposed = normalize_trailing_newline(new_content);
        let diff = FileDiff::compute(&current, &proposed, self.context_lines);

        let display_path = target
            .strip_prefix(&self.scope_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| target.clone());

        Ok(PendingMutation {
            target,
            display_path,
            current,
            proposed,
            diff,
        })
    }

    /// Applies or discards a pending mutation.
    ///
    /// Approval writes through a temp file in the target directory and
    /// renames it into place; an existing file keeps its permission bits, a
    /// new file gets default-created bits.
    pub fn resolve(
        &self,
        pending: PendingMutation,
        decision: Decision,
    ) -> Result<MutationOutcome, MutationError> {
        match decision {
            Decision::Decline => Ok(MutationOutcome::Discarded),
            Decision::Approve | Decision::AutoApproved => self.apply(pending),
        }
    }

    fn apply(&self, pending: PendingMutation) -> Result<MutationOutcome, MutationError> {
        // Re-validate at apply time. A target with dot components left in it
        // never came from `resolve_write_target`; the directories it would
        // create must not be trusted.
        if pending
            .target
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::CurDir))
        {
            return Err(MutationError::ScopeEscape(pending.target.clone()));
        }

        let anchor = canonicalize_existing_ancestor(
            pending
                .target
                .parent()
                .ok_or_else(|| MutationError::NoParent(pending.target.clone()))?,
        )?;
        if !anchor.starts_with(&self.scope_root) {
            return Err(MutationError::ScopeEscape(pending.target.clone()));
        }

        let parent = pending
            .target
            .parent()
            .ok_or_else(|| MutationError::NoParent(pending.target.clone()))?;
        fs::create_dir_all(parent)
            .map_err(|source| MutationError::io("creating parent directories", parent, source))?;

        let original_permissions = match fs::metadata(&pending.target) {
            Ok(metadata) => Some(metadata.permissions()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(MutationError::io(
                    "inspecting target metadata",
                    &pending.target,
                    source,
                ));
            }
        };

        let mut temp = NamedTempFile::new_in(parent)
            .map_err(|source| MutationError::io("creating temp file", parent, source))?;
        temp.write_all(pending.proposed.as_bytes())
            .map_err(|source| MutationError::io("writing temp file", temp.path(), source))?;

        if let Some(permissions) = original_permissions {
            temp.as_file()
                .set_permissions(permissions)
                .map_err(|source| MutationError::io("copying permissions", temp.path(), source))?;
        }

        temp.persist(&pending.target).map_err(|error| {
            MutationError::io("renaming temp file into place", &pending.target, error.error)
        })?;

        Ok(MutationOutcome::Applied {
            path: pending.target,
        })
    }

    fn resolve_write_target(&self, path: &str) -> Result<PathBuf, MutationError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(MutationError::ScopeEscape(PathBuf::from(path)));
        }

        let candidate = {
            let candidate = Path::new(trimmed);
            if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                self.scope_root.join(candidate)
            }
        };

        // A `..` routed through a directory that does not exist yet would
        // slip past the existing-ancestor anchor below, so resolve dot
        // components lexically first and check containment on the result.
        let candidate = lexical_normalize(&candidate);
        if !candidate.starts_with(&self.scope_root) {
            return Err(MutationError::ScopeEscape(candidate));
        }

        let parent = candidate
            .parent()
            .ok_or_else(|| MutationError::NoParent(candidate.clone()))?;
        let anchor = canonicalize_existing_ancestor(parent)?;
        if !anchor.starts_with(&self.scope_root) {
            return Err(MutationError::ScopeEscape(candidate));
        }

        // An existing target may itself be a symlink pointing outside.
        if candidate.exists() {
            let canonical = candidate.canonicalize().map_err(|source| {
                MutationError::io("resolving target path", &candidate, source)
            })?;
            if !canonical.starts_with(&self.scope_root) {
                return Err(MutationError::ScopeEscape(candidate));
            }
            return Ok(canonical);
        }

        Ok(candidate)
    }

    fn read_current(&self, target: &Path) -> Result<String, MutationError> {
        match fs::read(target) {
            Ok(bytes) => String::from_utf8(bytes)
                .map_err(|_| MutationError::BinaryContent(target.to_path_buf())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(MutationError::io("reading current content", target, source)),
        }
    }
}

/// Collapses any run of trailing newlines to exactly one, adding one when
/// missing. Empty content stays empty.
#[must_use]
pub fn normalize_trailing_newline(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    let mut normalized = content.trim_end_matches('\n').to_string();
    normalized.push('\n');
    normalized
}

/// Resolves `.` and `..` components without touching the filesystem. A `..`
/// at the root is dropped; the caller checks containment on the result.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, MutationError> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor.canonicalize().map_err(|source| {
                MutationError::io("resolving ancestor path", ancestor, source)
            });
        }
    }

    Err(MutationError::NoExistingAncestor(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{lexical_normalize, normalize_trailing_newline};

    #[test]
    fn normalize_adds_exactly_one_trailing_newline() {
        assert_eq!(normalize_trailing_newline("a"), "a\n");
        assert_eq!(normalize_trailing_newline("a\n"), "a\n");
        assert_eq!(normalize_trailing_newline("a\n\n\n"), "a\n");
        assert_eq!(normalize_trailing_newline(""), "");
    }

    #[test]
    fn lexical_normalize_resolves_dot_components_without_io() {
        assert_eq!(
            lexical_normalize(Path::new("/root/missing/../../evil.txt")),
            PathBuf::from("/evil.txt")
        );
        assert_eq!(
            lexical_normalize(Path::new("/root/a/./b/../c.txt")),
            PathBuf::from("/root/a/c.txt")
        );
        assert_eq!(lexical_normalize(Path::new("/../x")), PathBuf::from("/x"));
    }
}
