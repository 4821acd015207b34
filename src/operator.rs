//! Operator boundary: the narrow callback surface the session core exposes
//! to whatever renders it (a CLI front end, a test harness).
//!
//! The core never writes to a terminal directly; everything user-visible
//! flows through this trait.

use std::io::{self, BufRead, Write};

use mutation_gate::{DiffTag, PendingMutation};

use crate::plan::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Decline,
}

pub trait Operator {
    /// Shows a rendered diff and asks for a verdict.
    fn review_mutation(&mut self, pending: &PendingMutation) -> ReviewDecision;

    /// Shows a shell command about to run and asks for a verdict.
    fn review_command(&mut self, command: &str) -> ReviewDecision;

    /// Model reasoning text, streamed in arrival order.
    fn show_reasoning_chunk(&mut self, text: &str);

    /// Assistant message text, streamed in arrival order.
    fn show_message_chunk(&mut self, text: &str);

    /// One-line tool activity notes (started/completed/failed).
    fn show_tool_activity(&mut self, line: &str);

    /// Current plan state after an accepted update.
    fn show_plan(&mut self, plan: &Plan);

    /// Session-level notices (authorization granted, retrying, ...).
    fn notify(&mut self, text: &str);

    /// Requests the next instruction; `None` ends the session.
    fn next_instruction(&mut self) -> Option<String>;

    /// Reports a fatal error once, before the session ends.
    fn report_error(&mut self, error: &str);
}

/// Line-oriented stdin/stdout operator used by the binary.
#[derive(Debug, Default)]
pub struct StdioOperator;

impl StdioOperator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn prompt_yes_no(&self, question: &str) -> ReviewDecision {
        loop {
            print!("{question} [y/N] ");
            let _ = io::stdout().flush();

            let mut answer = String::new();
            if io::stdin().lock().read_line(&mut answer).is_err() {
                return ReviewDecision::Decline;
            }

            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return ReviewDecision::Approve,
                "" | "n" | "no" => return ReviewDecision::Decline,
                _ => println!("Please answer y or n."),
            }
        }
    }
}

impl Operator for StdioOperator {
    fn review_mutation(&mut self, pending: &PendingMutation) -> ReviewDecision {
        let label = pending.display_path().display().to_string();
        println!("{}", pending.diff().render(&label));

        let added = count_tag(pending, DiffTag::Added);
        let removed = count_tag(pending, DiffTag::Removed);
        self.prompt_yes_no(&format!("Apply change to {label} (+{added}/-{removed})?"))
    }

    fn review_command(&mut self, command: &str) -> ReviewDecision {
        self.prompt_yes_no(&format!("Run command `{command}`?"))
    }

    fn show_reasoning_chunk(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn show_message_chunk(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn show_tool_activity(&mut self, line: &str) {
        println!("{line}");
    }

    fn show_plan(&mut self, plan: &Plan) {
        println!("Plan:\n{}", plan.render());
    }

    fn notify(&mut self, text: &str) {
        println!("{text}");
    }

    fn next_instruction(&mut self) -> Option<String> {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    self.next_instruction()
                } else {
                    Some(trimmed.to_string())
                }
            }
        }
    }

    fn report_error(&mut self, error: &str) {
        eprintln!("error: {error}");
    }
}

fn count_tag(pending: &PendingMutation, tag: DiffTag) -> usize {
    pending
        .diff()
        .lines()
        .iter()
        .filter(|line| line.tag == tag)
        .count()
}
