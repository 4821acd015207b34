//! Session Engine: owns the conversation, drives the turn loop against the
//! inference provider, and routes tool calls through the dispatcher.
//!
//! Provider events for a turn are staged in pending-turn memory and only
//! committed to the model-facing conversation when the stream completes;
//! a transport failure discards the staged entries so the single retry
//! cannot duplicate history. Operator input is classified first: the
//! authorization phrase flips the session flag without reaching the model,
//! and a leading `!` runs a local sandboxed command whose transcript is
//! prepended to the next outbound message.

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use inference_provider::{
    CancelSignal, ToolCallRequest, TurnEvent, TurnId, TurnMessage, TurnProvider, TurnRequest,
};
use thiserror::Error;
use transcript_store::{TranscriptEntryKind, TranscriptStore};

use crate::dispatch::{DispatchContext, ToolDispatcher};
use crate::intent::{is_auth_phrase, DEFAULT_AUTH_PHRASE};
use crate::operator::Operator;
use crate::plan::Plan;

pub const SYSTEM_INSTRUCTIONS_ENV_VAR: &str = "TERM_AGENT_SYSTEM_INSTRUCTIONS";
pub const AUTH_PHRASE_ENV_VAR: &str = "TERM_AGENT_AUTH_PHRASE";
pub const SHELL_TIMEOUT_ENV_VAR: &str = "TERM_AGENT_SHELL_TIMEOUT_SEC";
pub const SHELL_MAX_OUTPUT_ENV_VAR: &str = "TERM_AGENT_SHELL_MAX_OUTPUT";

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You are a careful terminal coding agent operating \
inside a scoped repository root. You may call the tools `read`, `write`, `apply_patch`, `shell`, \
and `plan_update`. Use `write` or `apply_patch` for any file change and wait for the result; \
never claim success unless the tool call succeeded. Mutations and shell commands may require \
operator confirmation until the operator grants session-wide authorization with their \
authorization phrase; if a change is declined, ask for more context instead of retrying blindly. \
Track multi-step work with `plan_update` and always cite relevant files.";

pub fn system_instructions_from_env() -> String {
    sanitize_or_default(
        std::env::var(SYSTEM_INSTRUCTIONS_ENV_VAR).ok(),
        DEFAULT_SYSTEM_INSTRUCTIONS,
    )
}

pub fn auth_phrase_from_env() -> String {
    sanitize_or_default(std::env::var(AUTH_PHRASE_ENV_VAR).ok(), DEFAULT_AUTH_PHRASE)
}

pub fn limits_from_env() -> command_sandbox::Limits {
    let mut limits = command_sandbox::Limits::default();

    if let Some(seconds) = parse_env_var::<u64>(SHELL_TIMEOUT_ENV_VAR) {
        limits.timeout = Duration::from_secs(seconds);
    }
    if let Some(bytes) = parse_env_var::<usize>(SHELL_MAX_OUTPUT_ENV_VAR) {
        limits.max_output_bytes = bytes;
    }

    limits
}

fn parse_env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn sanitize_or_default(raw: Option<String>, default: &str) -> String {
    match raw {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub scope_root: PathBuf,
    pub system_instructions: String,
    pub auth_phrase: String,
    pub one_shot: bool,
    pub limits: command_sandbox::Limits,
}

impl SessionConfig {
    #[must_use]
    pub fn new(scope_root: impl Into<PathBuf>) -> Self {
        Self {
            scope_root: scope_root.into(),
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
            auth_phrase: DEFAULT_AUTH_PHRASE.to_string(),
            one_shot: false,
            limits: command_sandbox::Limits::default(),
        }
    }

    #[must_use]
    pub fn from_env(scope_root: impl Into<PathBuf>, one_shot: bool) -> Self {
        Self {
            scope_root: scope_root.into(),
            system_instructions: system_instructions_from_env(),
            auth_phrase: auth_phrase_from_env(),
            one_shot,
            limits: limits_from_env(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    ProcessingEvents,
    AwaitingInstruction,
    Ended,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid session configuration: {0}")]
    Config(String),

    #[error("inference service failed after retry: {0}")]
    Service(String),
}

pub struct Session<'a> {
    provider: &'a dyn TurnProvider,
    config: SessionConfig,
    state: SessionState,
    conversation: Vec<TurnMessage>,
    plan: Plan,
    authorized: bool,
    latest_instruction: String,
    next_turn_id: TurnId,
    dispatcher: ToolDispatcher,
    transcript: TranscriptStore,
    operator_shell_notes: Vec<String>,
    cancel: CancelSignal,
}

impl<'a> Session<'a> {
    pub fn new(
        provider: &'a dyn TurnProvider,
        config: SessionConfig,
        cancel: CancelSignal,
    ) -> Result<Self, SessionError> {
        let dispatcher = ToolDispatcher::new(&config.scope_root, config.limits)
            .map_err(|error| SessionError::Config(error.to_string()))?;
        let transcript = TranscriptStore::create_new(dispatcher.scope_root())
            .map_err(|error| SessionError::Config(error.to_string()))?;

        Ok(Self {
            provider,
            config,
            state: SessionState::Idle,
            conversation: Vec::new(),
            plan: Plan::new(),
            authorized: false,
            latest_instruction: String::new(),
            next_turn_id: 1,
            dispatcher,
            transcript,
            operator_shell_notes: Vec::new(),
            cancel,
        })
    }

    /// Convenience entry point: build a session and run it to completion.
    pub fn start(
        provider: &'a dyn TurnProvider,
        operator: &mut dyn Operator,
        config: SessionConfig,
        initial_instruction: Option<String>,
        cancel: CancelSignal,
    ) -> Result<(), SessionError> {
        let mut session = Session::new(provider, config, cancel)?;
        session.run(operator, initial_instruction)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn authorized(&self) -> bool {
        self.authorized
    }

    #[must_use]
    pub fn conversation(&self) -> &[TurnMessage] {
        &self.conversation
    }

    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Path of the scratch transcript; the file is removed when the session
    /// drops.
    #[must_use]
    pub fn transcript_path(&self) -> &std::path::Path {
        self.transcript.path()
    }

    /// Runs the instruction loop until the operator ends the session, the
    /// one-shot turn completes, an interrupt arrives, or a fatal error
    /// surfaces. The scratch transcript is removed on every exit path when
    /// the session drops.
    pub fn run(
        &mut self,
        operator: &mut dyn Operator,
        initial_instruction: Option<String>,
    ) -> Result<(), SessionError> {
        let mut next_input = initial_instruction;

        loop {
            if self.interrupted() {
                self.state = SessionState::Ended;
                return Ok(());
            }

            let input = match next_input.take() {
                Some(input) => input,
                None => match operator.next_instruction() {
                    Some(input) => input,
                    None => {
                        self.state = SessionState::Ended;
                        return Ok(());
                    }
                },
            };
            let input = input.trim().to_string();
            if input.is_empty() {
                continue;
            }

            if is_auth_phrase(&input, &self.config.auth_phrase) {
                self.authorized = true;
                operator.notify(
                    "Session authorization granted: mutations and commands now auto-approve.",
                );
                if self.config.one_shot {
                    self.state = SessionState::Ended;
                    return Ok(());
                }
                continue;
            }

            if let Some(command) = input.strip_prefix('!') {
                self.run_operator_command(operator, command.trim());
                if self.config.one_shot {
                    self.state = SessionState::Ended;
                    return Ok(());
                }
                continue;
            }

            self.latest_instruction = input.clone();
            let outbound = self.compose_user_message(&input);
            let _ = self.transcript.record(TranscriptEntryKind::UserText {
                text: outbound.clone(),
            });
            self.conversation.push(TurnMessage::UserText { text: outbound });

            if let Err(error) = self.drive_turns(operator) {
                self.state = SessionState::Ended;
                operator.report_error(&error.to_string());
                return Err(error);
            }

            if self.interrupted() || self.config.one_shot {
                self.state = SessionState::Ended;
                return Ok(());
            }
            self.state = SessionState::AwaitingInstruction;
        }
    }

    /// Runs provider turns until one completes without tool calls. A turn
    /// that produced tool results auto-continues so the service receives the
    /// collected results as the next outbound content.
    fn drive_turns(&mut self, operator: &mut dyn Operator) -> Result<(), SessionError> {
        loop {
            let had_tool_results = self.run_turn(operator)?;
            if self.interrupted() || !had_tool_results {
                return Ok(());
            }
        }
    }

    fn run_turn(&mut self, operator: &mut dyn Operator) -> Result<bool, SessionError> {
        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;

        let request = TurnRequest {
            turn_id,
            messages: self.conversation.clone(),
            instructions: self.config.system_instructions.clone(),
        };

        let mut retried = false;
        loop {
            self.state = SessionState::AwaitingResponse;
            match self.stream_turn(operator, request.clone()) {
                Ok(staged) => {
                    self.state = SessionState::ProcessingEvents;
                    let had_tool_results = staged
                        .iter()
                        .any(|message| matches!(message, TurnMessage::ToolResult { .. }));
                    self.commit_turn(staged);
                    return Ok(had_tool_results);
                }
                // Failed attempts stage nothing into the conversation, so
                // the retry resends identical outbound content.
                Err(error) if !retried && !self.interrupted() => {
                    retried = true;
                    operator.notify(&format!("Transport failure, retrying once: {error}"));
                }
                Err(error) => return Err(SessionError::Service(error)),
            }
        }
    }

    fn stream_turn(
        &mut self,
        operator: &mut dyn Operator,
        request: TurnRequest,
    ) -> Result<Vec<TurnMessage>, String> {
        let provider = self.provider;
        let cancel = Arc::clone(&self.cancel);
        let authorized = self.authorized;
        let instruction = self.latest_instruction.clone();

        let dispatcher = &self.dispatcher;
        let plan = &mut self.plan;

        // Both closures touch the operator, the transcript, and the staged
        // entries; provider callbacks are serial, never nested.
        let staged = RefCell::new(Vec::new());
        let operator = RefCell::new(operator);
        let transcript = RefCell::new(&mut self.transcript);

        let mut resolve_tool = |call: ToolCallRequest| {
            staged.borrow_mut().push(TurnMessage::ToolCall {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            });
            operator.borrow_mut().show_tool_activity(&format!(
                "Tool {} ({}) started",
                call.tool_name, call.call_id
            ));

            let result = {
                let mut operator = operator.borrow_mut();
                let mut transcript = transcript.borrow_mut();
                let mut ctx = DispatchContext {
                    operator: &mut **operator,
                    plan: &mut *plan,
                    transcript: &mut **transcript,
                    authorized,
                    instruction: &instruction,
                    cancel: &cancel,
                };
                dispatcher.dispatch(&mut ctx, &call)
            };

            let mut activity = format!(
                "Tool {} ({}) {}",
                result.tool_name,
                result.call_id,
                if result.is_error { "failed" } else { "completed" }
            );
            if result.is_error {
                if let Some(text) = result.content.as_str() {
                    activity.push_str(": ");
                    activity.push_str(text);
                }
            }
            operator.borrow_mut().show_tool_activity(&activity);

            staged.borrow_mut().push(TurnMessage::ToolResult {
                call_id: result.call_id.clone(),
                tool_name: result.tool_name.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            });
            result
        };

        let mut emit = |event: TurnEvent| match event {
            TurnEvent::ReasoningChunk { text } => {
                operator.borrow_mut().show_reasoning_chunk(&text);
                let _ = transcript
                    .borrow_mut()
                    .record(TranscriptEntryKind::Reasoning { text });
            }
            TurnEvent::MessageChunk { text } => {
                operator.borrow_mut().show_message_chunk(&text);
                let mut staged = staged.borrow_mut();
                if let Some(TurnMessage::AssistantText { text: existing }) = staged.last_mut() {
                    existing.push_str(&text);
                } else {
                    staged.push(TurnMessage::AssistantText { text });
                }
            }
            // Staged by resolve_tool, which the provider invokes first.
            TurnEvent::ToolCall(_) => {}
        };

        provider.send_turn(request, Arc::clone(&cancel), &mut resolve_tool, &mut emit)?;
        Ok(staged.into_inner())
    }

    fn commit_turn(&mut self, staged: Vec<TurnMessage>) {
        for message in &staged {
            if let TurnMessage::AssistantText { text } = message {
                let _ = self.transcript.record(TranscriptEntryKind::AssistantText {
                    text: text.clone(),
                });
            }
        }

        self.conversation.extend(staged);
    }

    fn run_operator_command(&mut self, operator: &mut dyn Operator, command: &str) {
        let request =
            command_sandbox::CommandRequest::new(command, self.dispatcher.scope_root());
        match command_sandbox::execute(&request, self.config.limits, &self.cancel) {
            Ok(result) => {
                let rendered = result.render();
                operator.notify(&rendered);
                self.operator_shell_notes
                    .push(format!("Operator ran `{command}`:\n{rendered}"));
            }
            Err(error) => {
                operator.notify(&format!("Command not run: {error}"));
            }
        }
    }

    /// Prepends any buffered operator shell transcripts so the model sees
    /// what the operator ran between instructions.
    fn compose_user_message(&mut self, instruction: &str) -> String {
        if self.operator_shell_notes.is_empty() {
            return instruction.to_string();
        }

        let mut parts = std::mem::take(&mut self.operator_shell_notes);
        parts.push(instruction.to_string());
        parts.join("\n\n")
    }

    fn interrupted(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}
