//! Single-file unified-diff application.
//!
//! Parses `@@ -a,b +c,d @@` hunks and replays them against the current file
//! content. Context and removal lines must match the file exactly at the
//! hunk position; any mismatch fails the whole patch without partial
//! application.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("patch contains no hunks")]
    Empty,

    #[error("malformed hunk header at patch line {line}: {text}")]
    MalformedHunk { line: usize, text: String },

    #[error("unexpected patch line {line} outside any hunk: {text}")]
    StrayLine { line: usize, text: String },

    #[error("hunk does not apply at file line {file_line}: expected {expected:?}, found {found:?}")]
    ContextMismatch {
        file_line: usize,
        expected: String,
        found: Option<String>,
    },

    #[error("hunk at file line {file_line} starts beyond the end of the file")]
    HunkBeyondEof { file_line: usize },
}

/// Applies a unified diff to `current` and returns the patched content.
pub fn apply_unified_diff(current: &str, diff: &str) -> Result<String, PatchError> {
    let old_lines: Vec<&str> = if current.is_empty() {
        Vec::new()
    } else {
        current.trim_end_matches('\n').split('\n').collect()
    };

    let mut output: Vec<String> = Vec::new();
    let mut old_cursor = 0usize;
    let mut in_hunk = false;
    let mut hunk_count = 0usize;

    for (index, raw) in diff.lines().enumerate() {
        let patch_line = index + 1;

        if raw.starts_with("--- ") || raw.starts_with("+++ ") || raw.starts_with("diff ") {
            continue;
        }

        if let Some(header) = raw.strip_prefix("@@") {
            let old_start = parse_hunk_old_start(header).ok_or_else(|| {
                PatchError::MalformedHunk {
                    line: patch_line,
                    text: raw.to_string(),
                }
            })?;

            // Copy unchanged lines up to the hunk start (1-based; 0 means
            // insertion into an empty file).
            let target = old_start.saturating_sub(1);
            if target < old_cursor || target > old_lines.len() {
                return Err(PatchError::HunkBeyondEof {
                    file_line: old_start,
                });
            }

            while old_cursor < target {
                output.push(old_lines[old_cursor].to_string());
                old_cursor += 1;
            }

            in_hunk = true;
            hunk_count += 1;
            continue;
        }

        if !in_hunk {
            if raw.trim().is_empty() {
                continue;
            }
            return Err(PatchError::StrayLine {
                line: patch_line,
                text: raw.to_string(),
            });
        }

        match raw.chars().next() {
            Some('+') => output.push(raw[1..].to_string()),
            Some('-') => {
                expect_old_line(&old_lines, old_cursor, &raw[1..])?;
                old_cursor += 1;
            }
            Some(' ') => {
                expect_old_line(&old_lines, old_cursor, &raw[1..])?;
                output.push(raw[1..].to_string());
                old_cursor += 1;
            }
            Some('\\') => {} // "\ No newline at end of file"
            None => {
                // Some producers emit context blank lines without the
                // leading space.
                expect_old_line(&old_lines, old_cursor, "")?;
                output.push(String::new());
                old_cursor += 1;
            }
            Some(_) => {
                return Err(PatchError::StrayLine {
                    line: patch_line,
                    text: raw.to_string(),
                });
            }
        }
    }

    if hunk_count == 0 {
        return Err(PatchError::Empty);
    }

    while old_cursor < old_lines.len() {
        output.push(old_lines[old_cursor].to_string());
        old_cursor += 1;
    }

    let mut patched = output.join("\n");
    if !patched.is_empty() {
        patched.push('\n');
    }
    Ok(patched)
}

fn expect_old_line(
    old_lines: &[&str],
    cursor: usize,
    expected: &str,
) -> Result<(), PatchError> {
    let found = old_lines.get(cursor).copied();
    if found == Some(expected) {
        Ok(())
    } else {
        Err(PatchError::ContextMismatch {
            file_line: cursor + 1,
            expected: expected.to_string(),
            found: found.map(str::to_string),
        })
    }
}

/// Extracts the old-file start line from a hunk header body like
/// ` -12,3 +14,4 @@`.
fn parse_hunk_old_start(header: &str) -> Option<usize> {
    let rest = header.trim_start().strip_prefix('-')?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}
