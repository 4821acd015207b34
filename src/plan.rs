//! Task plan tracked across a session.
//!
//! The plan is mutated only through whole-list updates from the
//! `plan_update` tool. Items are never removed: an update may append new
//! items and transition statuses, and at most one item may be in progress.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanItem {
    pub step: String,
    pub status: PlanStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan update marks {count} items in_progress; at most one is allowed")]
    MultipleInProgress { count: usize },

    #[error("plan update removes items; the plan has {current} items but the update has {proposed}")]
    ItemsRemoved { current: usize, proposed: usize },

    #[error("plan update rewrites step {index}: existing steps may only change status")]
    StepRewritten { index: usize },

    #[error("plan item {index} has an empty step description")]
    EmptyStep { index: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    items: Vec<PlanItem>,
}

impl Plan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replaces the plan with `proposed` if it is a valid successor state.
    ///
    /// On error the plan is left unchanged.
    pub fn apply(&mut self, proposed: Vec<PlanItem>) -> Result<(), PlanError> {
        let in_progress = proposed
            .iter()
            .filter(|item| item.status == PlanStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Err(PlanError::MultipleInProgress { count: in_progress });
        }

        if proposed.len() < self.items.len() {
            return Err(PlanError::ItemsRemoved {
                current: self.items.len(),
                proposed: proposed.len(),
            });
        }

        for (index, item) in proposed.iter().enumerate() {
            if item.step.trim().is_empty() {
                return Err(PlanError::EmptyStep { index });
            }

            if let Some(existing) = self.items.get(index) {
                if existing.step != item.step {
                    return Err(PlanError::StepRewritten { index });
                }
            }
        }

        self.items = proposed;
        Ok(())
    }

    /// Renders the plan as a checklist for operator display.
    #[must_use]
    pub fn render(&self) -> String {
        if self.items.is_empty() {
            return "(no plan)".to_string();
        }

        self.items
            .iter()
            .map(|item| {
                let marker = match item.status {
                    PlanStatus::Pending => "[ ]",
                    PlanStatus::InProgress => "[>]",
                    PlanStatus::Completed => "[x]",
                };
                format!("{marker} {}", item.step)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
