//! Deterministic scripted provider for tests and the `mock` provider id.
//!
//! A [`ScriptedProvider`] replays a fixed sequence of turn scripts. Each call
//! to `send_turn` consumes the next script: either a list of [`TurnEvent`]s
//! streamed in order, or an injected transport failure used to exercise the
//! host's retry budget.

use std::sync::atomic::Ordering;
use std::sync::Mutex;

use inference_provider::{
    CancelSignal, ProviderProfile, ToolCallRequest, ToolResult, TurnEvent, TurnProvider,
    TurnRequest,
};

/// One scripted response to a `send_turn` call.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnScript {
    /// Stream these events in order, then complete the turn.
    Events(Vec<TurnEvent>),
    /// Fail the transport before emitting anything.
    TransportFailure(String),
    /// Emit some events, then fail the transport mid-stream.
    FailAfter {
        events: Vec<TurnEvent>,
        error: String,
    },
}

pub struct ScriptedProvider {
    scripts: Mutex<Vec<TurnScript>>,
    requests: Mutex<Vec<TurnRequest>>,
    resolved_results: Mutex<Vec<ToolResult>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(scripts: Vec<TurnScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
            resolved_results: Mutex::new(Vec::new()),
        }
    }

    /// Convenience constructor: one turn that streams a single message.
    #[must_use]
    pub fn single_message(text: impl Into<String>) -> Self {
        Self::new(vec![TurnScript::Events(vec![TurnEvent::MessageChunk {
            text: text.into(),
        }])])
    }

    /// Returns every turn request received so far, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<TurnRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    /// Returns every tool result the host handed back, in resolution order.
    #[must_use]
    pub fn resolved_results(&self) -> Vec<ToolResult> {
        lock_unpoisoned(&self.resolved_results).clone()
    }

    fn next_script(&self) -> Option<TurnScript> {
        let mut scripts = lock_unpoisoned(&self.scripts);
        if scripts.is_empty() {
            None
        } else {
            Some(scripts.remove(0))
        }
    }

    fn stream_events(
        &self,
        events: Vec<TurnEvent>,
        cancel: &CancelSignal,
        resolve_tool: &mut dyn FnMut(ToolCallRequest) -> ToolResult,
        emit: &mut dyn FnMut(TurnEvent),
    ) {
        for event in events {
            if cancel.load(Ordering::SeqCst) {
                return;
            }

            if let TurnEvent::ToolCall(call) = &event {
                let result = resolve_tool(call.clone());
                lock_unpoisoned(&self.resolved_results).push(result);
            }

            emit(event);
        }
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::single_message("Scripted provider ready. No turns were scripted.\n")
    }
}

impl TurnProvider for ScriptedProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: "mock".to_string(),
            model_id: "scripted".to_string(),
        }
    }

    fn send_turn(
        &self,
        req: TurnRequest,
        cancel: CancelSignal,
        resolve_tool: &mut dyn FnMut(ToolCallRequest) -> ToolResult,
        emit: &mut dyn FnMut(TurnEvent),
    ) -> Result<(), String> {
        lock_unpoisoned(&self.requests).push(req);

        match self.next_script() {
            None => {
                emit(TurnEvent::MessageChunk {
                    text: "Script exhausted.\n".to_string(),
                });
                Ok(())
            }
            Some(TurnScript::Events(events)) => {
                self.stream_events(events, &cancel, resolve_tool, emit);
                Ok(())
            }
            Some(TurnScript::TransportFailure(error)) => Err(error),
            Some(TurnScript::FailAfter { events, error }) => {
                self.stream_events(events, &cancel, resolve_tool, emit);
                Err(error)
            }
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
