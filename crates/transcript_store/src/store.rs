use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::TranscriptError;
use crate::schema::{JsonLine, TranscriptEntry, TranscriptEntryKind, TranscriptHeader};

const SCRATCH_DIR: &str = ".term_agent/transcripts";

/// Append-only JSONL transcript for one session.
///
/// Scratch semantics: the backing file is removed when the store is dropped,
/// so a transcript never outlives its process. `open` exists for validated
/// re-reads within the same process (audits, tests).
#[derive(Debug)]
pub struct TranscriptStore {
    path: PathBuf,
    file: File,
    header: TranscriptHeader,
    entries: Vec<TranscriptEntry>,
    seen_ids: HashSet<String>,
}

impl TranscriptStore {
    /// Creates a fresh transcript file under `<cwd>/.term_agent/transcripts/`
    /// and writes the header line.
    pub fn create_new(cwd: &Path) -> Result<Self, TranscriptError> {
        if !cwd.is_absolute() {
            return Err(TranscriptError::NonAbsoluteCreateCwd {
                path: cwd.to_path_buf(),
            });
        }

        let session_id = Uuid::new_v4().to_string();
        let created_at = now_rfc3339()?;
        let header = TranscriptHeader::v1(
            session_id.clone(),
            created_at.clone(),
            cwd.to_string_lossy().into_owned(),
        );

        let path = scratch_file_path(cwd, &created_at, &session_id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| {
                TranscriptError::io("creating transcript directory", dir, source)
            })?;
        }
        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| TranscriptError::io("creating transcript file", &path, source))?;

        let header_line = serde_json::to_string(&header)
            .map_err(|source| TranscriptError::json_serialize(&path, source))?;
        writeln!(file, "{header_line}")
            .map_err(|source| TranscriptError::io("writing transcript header", &path, source))?;
        file.flush()
            .map_err(|source| TranscriptError::io("flushing transcript header", &path, source))?;

        Ok(Self {
            path,
            file,
            header,
            entries: Vec::new(),
            seen_ids: HashSet::new(),
        })
    }

    /// Re-opens and validates an existing transcript file. The re-opened
    /// store takes over scratch ownership of the file.
    pub fn open(path: &Path) -> Result<Self, TranscriptError> {
        let path = path.to_path_buf();
        let read_file = File::open(&path)
            .map_err(|source| TranscriptError::io("opening transcript file", &path, source))?;
        let reader = BufReader::new(read_file);

        let mut header: Option<TranscriptHeader> = None;
        let mut entries = Vec::new();
        let mut seen_ids = HashSet::new();

        for (line_index, line_result) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line = line_result
                .map_err(|source| TranscriptError::io_line(&path, line_number, source))?;
            let parsed = parse_json_line(&path, line_number, &line)?;

            if line_number == 1 {
                match parsed {
                    JsonLine::Transcript(parsed_header) => {
                        validate_header_line(&path, line_number, &parsed_header)?;
                        header = Some(parsed_header);
                    }
                    JsonLine::Entry(_) => {
                        return Err(TranscriptError::InvalidHeaderRecord {
                            path,
                            line: line_number,
                        });
                    }
                }

                continue;
            }

            match parsed {
                JsonLine::Transcript(_) => {
                    return Err(TranscriptError::InvalidEntryRecord {
                        path,
                        line: line_number,
                    });
                }
                JsonLine::Entry(entry) => {
                    validate_entry_line(&path, line_number, &entry)?;
                    if !seen_ids.insert(entry.id.clone()) {
                        return Err(TranscriptError::DuplicateEntryId {
                            path,
                            line: line_number,
                            id: entry.id,
                        });
                    }

                    entries.push(entry);
                }
            }
        }

        let header =
            header.ok_or_else(|| TranscriptError::MissingHeader { path: path.clone() })?;

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| {
                TranscriptError::io("opening transcript file for append", &path, source)
            })?;

        Ok(Self {
            path,
            file,
            header,
            entries,
            seen_ids,
        })
    }

    /// Stamps a fresh entry (uuid id, current UTC timestamp) and appends it.
    pub fn record(&mut self, kind: TranscriptEntryKind) -> Result<(), TranscriptError> {
        let entry = TranscriptEntry::new(Uuid::new_v4().to_string(), now_rfc3339()?, kind);
        self.append(entry)
    }

    pub fn append(&mut self, entry: TranscriptEntry) -> Result<(), TranscriptError> {
        validate_entry_line(&self.path, self.entries.len() + 2, &entry)?;
        if self.seen_ids.contains(&entry.id) {
            return Err(TranscriptError::DuplicateEntryId {
                path: self.path.clone(),
                line: self.entries.len() + 2,
                id: entry.id,
            });
        }

        let line = serde_json::to_string(&entry)
            .map_err(|source| TranscriptError::json_serialize(&self.path, source))?;
        writeln!(self.file, "{line}")
            .map_err(|source| TranscriptError::io("appending transcript entry", &self.path, source))?;
        self.file
            .flush()
            .map_err(|source| TranscriptError::io("flushing transcript entry", &self.path, source))?;

        self.seen_ids.insert(entry.id.clone());
        self.entries.push(entry);
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &TranscriptHeader {
        &self.header
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }
}

impl Drop for TranscriptStore {
    fn drop(&mut self) {
        // Scratch file: best-effort removal, nothing useful to report here.
        let _ = fs::remove_file(&self.path);
    }
}

/// `<cwd>/.term_agent/transcripts/<created_at>_<session_id>.jsonl`, with the
/// timestamp made filesystem safe.
fn scratch_file_path(cwd: &Path, created_at: &str, session_id: &str) -> PathBuf {
    let stamp: String = created_at
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect();

    cwd.join(SCRATCH_DIR)
        .join(format!("{stamp}_{session_id}.jsonl"))
}

fn now_rfc3339() -> Result<String, TranscriptError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(TranscriptError::ClockFormat)
}

fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JsonLine, TranscriptError> {
    serde_json::from_str::<JsonLine>(line)
        .map_err(|source| TranscriptError::json_line(path, line_number, source))
}

fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &TranscriptHeader,
) -> Result<(), TranscriptError> {
    if header.version != 1 {
        return Err(TranscriptError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
        });
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)?;

    if !Path::new(&header.cwd).is_absolute() {
        return Err(TranscriptError::NonAbsoluteCwd {
            path: path.to_path_buf(),
            line: line_number,
            cwd: header.cwd.clone(),
        });
    }

    Ok(())
}

fn validate_entry_line(
    path: &Path,
    line_number: usize,
    entry: &TranscriptEntry,
) -> Result<(), TranscriptError> {
    validate_rfc3339(path, line_number, "ts", &entry.ts)
}

fn validate_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<(), TranscriptError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(TranscriptError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::scratch_file_path;

    #[test]
    fn scratch_file_name_is_filesystem_safe_and_unique_per_session() {
        let path = scratch_file_path(Path::new("/work"), "2026-08-29T10:30:00Z", "abc123");
        assert_eq!(
            path,
            Path::new("/work/.term_agent/transcripts/2026-08-29T10-30-00Z_abc123.jsonl")
        );
    }
}
