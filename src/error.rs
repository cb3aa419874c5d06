//! Error types for allocation operations

use crate::types::{AgentId, Cell, Timestep};
use thiserror::Error;

/// Errors that can occur while allocating airspace
///
/// Only [`Error::InvalidInput`] aborts a run. The other variants are raised by
/// individual components and absorbed by [`crate::allocate`] into per-agent
/// outcomes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("No feasible path for agent {agent}: {reason}")]
    PlanningFailure { agent: AgentId, reason: String },
    #[error("Conflict-based search exhausted after {expanded} expansions")]
    CbsExhausted { expanded: usize },
    #[error("Auction stopped after {rounds} rounds with {unresolved} agents unresolved")]
    AuctionExhausted { rounds: u32, unresolved: usize },
    #[error("Agent {agent} collides with a reservation at {cell} t={time}")]
    ReservationConflict {
        agent: AgentId,
        cell: Cell,
        time: Timestep,
    },
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn planning(agent: AgentId, reason: impl Into<String>) -> Self {
        Self::PlanningFailure {
            agent,
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for allocation operations
pub type Result<T> = std::result::Result<T, Error>;
