//! Scratch JSONL transcript of one agent session.
//!
//! A transcript is a single `.jsonl` file with a typed header line followed
//! by append-only entries. It exists for in-process auditing: the file is
//! removed when the store drops, so nothing persists past the session.

mod error;
mod schema;
mod store;

pub use error::TranscriptError;
pub use schema::{
    EntryRecordType, TranscriptEntry, TranscriptEntryKind, TranscriptHeader, TranscriptRecordType,
};
pub use store::TranscriptStore;
