//! Planning module for push operations.
//!
//! This module handles the comparison between desired and actual states,
//! generating ordered push plans and applying them.

mod diff;
mod executor;
mod plan;

pub use diff::{ApplicationDiff, DiffDetail, DiffEngine, DiffType};
pub use executor::{AppliedChange, ExecutionContext, ExecutionReport, Executor, ExecutorConfig};
pub use plan::{Change, ChangeResult, Plan, Planner};
