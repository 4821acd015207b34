//! Minimal provider-agnostic contract for driving one conversation turn.
//!
//! This crate intentionally defines only the turn lifecycle and the
//! host-mediated tool-calling contract. It excludes provider transport
//! details, wire payloads, and multi-session orchestration concerns.

use std::fmt;
use std::sync::{atomic::AtomicBool, Arc};

use serde_json::Value;

/// Identifier for one request/response turn within a session.
pub type TurnId = u64;

/// Shared cancellation flag for an in-flight turn.
///
/// Providers must observe it between event emissions and stop promptly.
pub type CancelSignal = Arc<AtomicBool>;

/// Error returned while constructing/configuring a provider before any turn
/// starts (missing credential, malformed provider settings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    /// Creates a new provider initialization error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderInitError {}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Provider-neutral model-facing conversation history item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnMessage {
    UserText {
        text: String,
    },
    AssistantText {
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
}

/// Input required to run one turn against a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub turn_id: TurnId,
    pub messages: Vec<TurnMessage>,
    pub instructions: String,
}

/// Host-mediated tool definition declared to the provider per turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Provider request envelope for one host tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Host tool call result returned back to providers.
///
/// The `call_id` must echo the originating [`ToolCallRequest`] so multi-call
/// turns stay correctly paired.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub is_error: bool,
    pub content: Value,
}

impl ToolResult {
    /// Constructs a successful tool result.
    #[must_use]
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            is_error: false,
            content: content.into(),
        }
    }

    /// Constructs a tool error result.
    #[must_use]
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            is_error: true,
            content: content.into(),
        }
    }
}

/// Provider-emitted stream item for a turn, delivered strictly in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Model reasoning text for operator display only; never replayed.
    ReasoningChunk { text: String },
    /// Assistant message text, appended to the display buffer in order.
    MessageChunk { text: String },
    /// Request to execute one host tool; resolved before the stream resumes.
    ToolCall(ToolCallRequest),
}

/// Immutable metadata describing a turn provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Provider interface for executing one turn request.
pub trait TurnProvider: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Returns the host-mediated tool definitions declared for each turn.
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    /// Streams one turn, emitting events in provider order.
    ///
    /// Tool-call events are resolved synchronously through `resolve_tool`;
    /// the callback is deterministic and serial from the caller perspective.
    /// An `Err` return is a transport failure: the stream is restartable and
    /// the host may retry with identical outbound content.
    fn send_turn(
        &self,
        req: TurnRequest,
        cancel: CancelSignal,
        resolve_tool: &mut dyn FnMut(ToolCallRequest) -> ToolResult,
        emit: &mut dyn FnMut(TurnEvent),
    ) -> Result<(), String>;
}
