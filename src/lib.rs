//! Terminal agent session core.
//!
//! A scoped, confirmation-gated bridge between an operator, a local source
//! tree, and a remote inference service. The session engine drives the turn
//! loop; the tool dispatcher validates and executes model-issued tool calls;
//! file writes pass through the mutation gate and shell commands through the
//! command sandbox, both pinned to a scope root.

pub mod dispatch;
pub mod intent;
pub mod operator;
pub mod patch;
pub mod plan;
pub mod providers;
pub mod session;

pub use dispatch::{DispatchError, ToolDispatcher};
pub use operator::{Operator, ReviewDecision};
pub use plan::{Plan, PlanError, PlanItem, PlanStatus};
pub use session::{Session, SessionConfig, SessionError, SessionState};
