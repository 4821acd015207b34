use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRecordType {
    #[default]
    Transcript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryRecordType {
    #[default]
    Entry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscriptHeader {
    // The `type` field doubles as the `JsonLine` tag, which serde strips
    // before deserializing this struct, so it must be defaultable here.
    #[serde(rename = "type", default)]
    pub record_type: TranscriptRecordType,
    pub version: u32,
    pub session_id: String,
    pub created_at: String,
    pub cwd: String,
}

impl TranscriptHeader {
    #[must_use]
    pub fn v1(
        session_id: impl Into<String>,
        created_at: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            record_type: TranscriptRecordType::Transcript,
            version: 1,
            session_id: session_id.into(),
            created_at: created_at.into(),
            cwd: cwd.into(),
        }
    }
}

// No `deny_unknown_fields` here: serde does not support it together with
// the `#[serde(flatten)]` on `kind` (all flattened fields would be rejected).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    // See `TranscriptHeader::record_type`: the tag is consumed by `JsonLine`.
    #[serde(rename = "type", default)]
    pub record_type: EntryRecordType,
    pub id: String,
    pub ts: String,
    #[serde(flatten)]
    pub kind: TranscriptEntryKind,
}

impl TranscriptEntry {
    #[must_use]
    pub fn new(id: impl Into<String>, ts: impl Into<String>, kind: TranscriptEntryKind) -> Self {
        Self {
            record_type: EntryRecordType::Entry,
            id: id.into(),
            ts: ts.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TranscriptEntryKind {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: Value,
        is_error: bool,
    },
    /// Accepted plan state, recorded whole for auditability.
    PlanSnapshot {
        items: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum JsonLine {
    Transcript(TranscriptHeader),
    Entry(TranscriptEntry),
}
