//! Tool Dispatcher: maps one model-issued tool call to exactly one of the
//! declared capabilities and produces a structured result.
//!
//! Arguments arrive as loose JSON and are validated into typed structs with
//! unknown fields rejected. Every dispatch is logged to the session
//! transcript, success or not. Per-call failures become error tool results
//! so the model can self-correct; they never end the session.

use std::fs;
use std::path::{Path, PathBuf};

use inference_provider::{CancelSignal, ToolCallRequest, ToolDefinition, ToolResult};
use mutation_gate::{Decision, MutationError, MutationGate, MutationOutcome, PendingMutation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use transcript_store::{TranscriptEntryKind, TranscriptStore};

use crate::intent::instruction_implies_write;
use crate::operator::{Operator, ReviewDecision};
use crate::patch::{apply_unified_diff, PatchError};
use crate::plan::{Plan, PlanError, PlanItem};

pub const TOOL_READ: &str = "read";
pub const TOOL_WRITE: &str = "write";
pub const TOOL_APPLY_PATCH: &str = "apply_patch";
pub const TOOL_SHELL: &str = "shell";
pub const TOOL_PLAN_UPDATE: &str = "plan_update";

const DEFAULT_READ_LINE_LIMIT: usize = 2000;
const DEFAULT_READ_MAX_BYTES: usize = 200 * 1024;

const DECLINE_MUTATION_MESSAGE: &str =
    "Change declined by operator; ask for more context or propose a smaller change.";
const DECLINE_COMMAND_MESSAGE: &str =
    "Command declined by operator; explain why it is needed or try a narrower command.";

/// Tool-call failures surfaced to the model as error results.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("path escapes scope root: {0}")]
    ScopeEscape(PathBuf),

    #[error("{0} is not UTF-8 text")]
    BinaryFile(PathBuf),

    #[error("file exceeds max read size ({size} bytes > {limit} bytes)")]
    FileTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Sandbox(#[from] command_sandbox::SandboxError),

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadArgs {
    path: String,
    /// 1-based first line to return.
    offset: Option<usize>,
    /// Maximum number of lines to return.
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApplyPatchArgs {
    path: String,
    diff: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellArgs {
    command: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanUpdateArgs {
    items: Vec<PlanItem>,
}

/// Mutable session state the dispatcher acts on for one tool call.
pub struct DispatchContext<'a> {
    pub operator: &'a mut dyn Operator,
    pub plan: &'a mut Plan,
    pub transcript: &'a mut TranscriptStore,
    pub authorized: bool,
    pub instruction: &'a str,
    pub cancel: &'a CancelSignal,
}

struct ToolOutcome {
    ok: bool,
    content: String,
}

impl ToolOutcome {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: content.into(),
        }
    }

    fn fail(content: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: content.into(),
        }
    }
}

pub struct ToolDispatcher {
    scope_root: PathBuf,
    gate: MutationGate,
    limits: command_sandbox::Limits,
    read_max_bytes: usize,
}

impl ToolDispatcher {
    pub fn new(
        scope_root: impl Into<PathBuf>,
        limits: command_sandbox::Limits,
    ) -> Result<Self, MutationError> {
        let gate = MutationGate::new(scope_root)?;
        Ok(Self {
            scope_root: gate.scope_root().to_path_buf(),
            gate,
            limits,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
        })
    }

    #[must_use]
    pub fn scope_root(&self) -> &Path {
        &self.scope_root
    }

    /// Declared tool schema sent to the inference service each turn.
    #[must_use]
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: TOOL_READ.to_string(),
                description: Some(
                    "Read UTF-8 text from a file inside the scope root. Optional 1-based \
                     line offset and line limit bound the returned slice."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "offset": { "type": "integer", "minimum": 1 },
                        "limit": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["path"],
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: TOOL_WRITE.to_string(),
                description: Some(
                    "Propose the full new content for a file. The operator reviews a diff \
                     unless the session is authorized."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["path", "content"],
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: TOOL_APPLY_PATCH.to_string(),
                description: Some(
                    "Apply a unified diff to one file. Context lines must match the current \
                     content exactly."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "diff": { "type": "string" }
                    },
                    "required": ["path", "diff"],
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: TOOL_SHELL.to_string(),
                description: Some(
                    "Run one shell command inside the scope root under a timeout and output \
                     limits. Destructive commands and paths outside the root are rejected."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string" }
                    },
                    "required": ["command"],
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: TOOL_PLAN_UPDATE.to_string(),
                description: Some(
                    "Replace the task plan. Existing steps may only change status; items are \
                     appended, never removed, and at most one may be in_progress."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "items": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "step": { "type": "string" },
                                    "status": {
                                        "type": "string",
                                        "enum": ["pending", "in_progress", "completed"]
                                    }
                                },
                                "required": ["step", "status"],
                                "additionalProperties": false
                            }
                        }
                    },
                    "required": ["items"],
                    "additionalProperties": false
                }),
            },
        ]
    }

    /// Executes one tool call and returns its structured result.
    pub fn dispatch(&self, ctx: &mut DispatchContext<'_>, call: &ToolCallRequest) -> ToolResult {
        // Audit trail; a transcript write failure never fails the tool call.
        let _ = ctx.transcript.record(TranscriptEntryKind::ToolCall {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        });

        let outcome = match self.run_tool(ctx, call) {
            Ok(outcome) => outcome,
            Err(error) => ToolOutcome::fail(error.to_string()),
        };

        let result = if outcome.ok {
            ToolResult::success(&call.call_id, &call.tool_name, outcome.content)
        } else {
            ToolResult::error(&call.call_id, &call.tool_name, outcome.content)
        };

        let _ = ctx.transcript.record(TranscriptEntryKind::ToolResult {
            call_id: result.call_id.clone(),
            tool_name: result.tool_name.clone(),
            content: result.content.clone(),
            is_error: result.is_error,
        });

        result
    }

    fn run_tool(
        &self,
        ctx: &mut DispatchContext<'_>,
        call: &ToolCallRequest,
    ) -> Result<ToolOutcome, DispatchError> {
        match call.tool_name.as_str() {
            TOOL_READ => {
                let args: ReadArgs = parse_args(TOOL_READ, &call.arguments)?;
                self.run_read(args)
            }
            TOOL_WRITE => {
                let args: WriteArgs = parse_args(TOOL_WRITE, &call.arguments)?;
                let pending = self.gate.propose(&args.path, &args.content)?;
                self.resolve_mutation(ctx, pending)
            }
            TOOL_APPLY_PATCH => {
                let args: ApplyPatchArgs = parse_args(TOOL_APPLY_PATCH, &call.arguments)?;
                self.run_apply_patch(ctx, args)
            }
            TOOL_SHELL => {
                let args: ShellArgs = parse_args(TOOL_SHELL, &call.arguments)?;
                self.run_shell(ctx, args)
            }
            TOOL_PLAN_UPDATE => {
                let args: PlanUpdateArgs = parse_args(TOOL_PLAN_UPDATE, &call.arguments)?;
                self.run_plan_update(ctx, args)
            }
            other => Err(DispatchError::UnknownTool(other.to_string())),
        }
    }

    fn run_read(&self, args: ReadArgs) -> Result<ToolOutcome, DispatchError> {
        let resolved = self.resolve_existing_path(&args.path)?;

        let bytes = fs::read(&resolved).map_err(|source| DispatchError::Io {
            operation: "reading file",
            path: resolved.clone(),
            source,
        })?;
        if bytes.len() > self.read_max_bytes {
            return Err(DispatchError::FileTooLarge {
                size: bytes.len(),
                limit: self.read_max_bytes,
            });
        }

        let content =
            String::from_utf8(bytes).map_err(|_| DispatchError::BinaryFile(resolved.clone()))?;

        let offset = args.offset.unwrap_or(1).max(1);
        let limit = args.limit.unwrap_or(DEFAULT_READ_LINE_LIMIT).max(1);
        let total_lines = content.lines().count();

        let window: Vec<&str> = content
            .lines()
            .skip(offset - 1)
            .take(limit)
            .collect();

        if window.is_empty() {
            if total_lines == 0 {
                return Ok(ToolOutcome::ok(String::new()));
            }
            return Ok(ToolOutcome::ok(format!(
                "[no lines to show: offset {offset} is past the last line ({total_lines})]"
            )));
        }

        let mut rendered = window.join("\n");
        let last_shown = offset - 1 + window.len();
        if offset > 1 || last_shown < total_lines {
            rendered.push_str(&format!(
                "\n[showing lines {offset}-{last_shown} of {total_lines}]"
            ));
        }

        Ok(ToolOutcome::ok(rendered))
    }

    fn run_apply_patch(
        &self,
        ctx: &mut DispatchContext<'_>,
        args: ApplyPatchArgs,
    ) -> Result<ToolOutcome, DispatchError> {
        // Probe proposal: scope-checks the target and yields its current
        // content without touching disk.
        let probe = self.gate.propose(&args.path, "")?;
        let patched = apply_unified_diff(probe.current_content(), &args.diff)?;

        let pending = self.gate.propose(&args.path, &patched)?;
        self.resolve_mutation(ctx, pending)
    }

    fn resolve_mutation(
        &self,
        ctx: &mut DispatchContext<'_>,
        pending: PendingMutation,
    ) -> Result<ToolOutcome, DispatchError> {
        let display = pending.display_path().display().to_string();

        if pending.is_noop() {
            return Ok(ToolOutcome::ok(format!(
                "No changes: {display} already has the proposed content"
            )));
        }

        let decision = if ctx.authorized || instruction_implies_write(ctx.instruction) {
            Decision::AutoApproved
        } else {
            match ctx.operator.review_mutation(&pending) {
                ReviewDecision::Approve => Decision::Approve,
                ReviewDecision::Decline => Decision::Decline,
            }
        };

        let changed = pending.diff().changed_lines();
        match self.gate.resolve(pending, decision)? {
            MutationOutcome::Applied { .. } => Ok(ToolOutcome::ok(format!(
                "Wrote {display} ({changed} lines changed)"
            ))),
            MutationOutcome::Discarded => Ok(ToolOutcome::fail(DECLINE_MUTATION_MESSAGE)),
        }
    }

    fn run_shell(
        &self,
        ctx: &mut DispatchContext<'_>,
        args: ShellArgs,
    ) -> Result<ToolOutcome, DispatchError> {
        // Reject before prompting so the operator never reviews a command
        // the sandbox would refuse anyway.
        if let Err(reason) = command_sandbox::validate(&args.command) {
            return Ok(ToolOutcome::fail(reason.to_string()));
        }

        if !ctx.authorized
            && ctx.operator.review_command(&args.command) == ReviewDecision::Decline
        {
            return Ok(ToolOutcome::fail(DECLINE_COMMAND_MESSAGE));
        }

        let request = command_sandbox::CommandRequest::new(&args.command, &self.scope_root);
        let result = command_sandbox::execute(&request, self.limits, ctx.cancel)?;

        Ok(ToolOutcome {
            ok: result.success(),
            content: result.render(),
        })
    }

    fn run_plan_update(
        &self,
        ctx: &mut DispatchContext<'_>,
        args: PlanUpdateArgs,
    ) -> Result<ToolOutcome, DispatchError> {
        ctx.plan.apply(args.items)?;

        let snapshot = serde_json::to_value(ctx.plan.items()).unwrap_or(Value::Null);
        let _ = ctx
            .transcript
            .record(TranscriptEntryKind::PlanSnapshot { items: snapshot });

        ctx.operator.show_plan(ctx.plan);
        Ok(ToolOutcome::ok(format!(
            "Plan updated ({} items)",
            ctx.plan.items().len()
        )))
    }

    fn resolve_existing_path(&self, path: &str) -> Result<PathBuf, DispatchError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::InvalidArguments {
                tool: TOOL_READ.to_string(),
                message: "path must not be empty".to_string(),
            });
        }

        let candidate = {
            let candidate = Path::new(trimmed);
            if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                self.scope_root.join(candidate)
            }
        };

        let canonical = candidate
            .canonicalize()
            .map_err(|source| DispatchError::Io {
                operation: "resolving path",
                path: candidate,
                source,
            })?;

        if !canonical.starts_with(&self.scope_root) {
            return Err(DispatchError::ScopeEscape(canonical));
        }

        Ok(canonical)
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, DispatchError> {
    serde_json::from_value(arguments.clone()).map_err(|error| DispatchError::InvalidArguments {
        tool: tool.to_string(),
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_args, DispatchError, ReadArgs, ShellArgs};
    use serde_json::json;

    #[test]
    fn parse_args_accepts_declared_fields_only() {
        let args: ReadArgs =
            parse_args("read", &json!({ "path": "src/lib.rs", "offset": 10, "limit": 5 }))
                .expect("valid args");
        assert_eq!(args.path, "src/lib.rs");
        assert_eq!(args.offset, Some(10));
        assert_eq!(args.limit, Some(5));
    }

    #[test]
    fn parse_args_rejects_unknown_fields() {
        let error = parse_args::<ShellArgs>("shell", &json!({ "command": "ls", "shell": "zsh" }))
            .expect_err("unknown field must fail");
        assert!(matches!(error, DispatchError::InvalidArguments { .. }));
    }

    #[test]
    fn parse_args_rejects_missing_required_fields() {
        let error =
            parse_args::<ShellArgs>("shell", &json!({})).expect_err("missing field must fail");
        let message = error.to_string();
        assert!(message.contains("shell"));
    }
}
