//! Path planning: single-agent A* and multi-agent conflict-based search

#[macro_export]
macro_rules! cbs_debug {
    ($($arg:tt)+) => {
        tracing::debug!(target: "cbs", $($arg)+)
    }
}

pub mod astar;
pub mod cbs;
pub mod conflicts;
pub mod constraints;

pub use astar::{CostMode, PlanRequest, plan};
pub use cbs::{CbsSolution, CbsSolver, plan_independently};
pub use conflicts::{Conflict, ConflictKind, first_conflict, is_conflict_free};
pub use constraints::{Constraint, ConstraintChain, ConstraintKind, ConstraintSet};
