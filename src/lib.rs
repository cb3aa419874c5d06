//! # airspace-alloc - conflict-free path allocation for aerial agents
//!
//! airspace-alloc assigns time-stamped paths on a shared 4-connected grid. It
//! first tries Conflict-Based Search (CBS) over all agents and falls back to
//! a congestion-priced auction when the search gives up.
//!
//! ## Modules
//!
//! - [`airspace`] - Time-expanded grid with permanent reservations
//! - [`planning`] - Single-agent A* and the CBS solver
//! - [`market`] - Congestion pricing, bidding rounds and the commit phase
//! - [`allocator`] - The end-to-end [`allocate`] run
//! - [`types`] - Cells, agents, paths
//! - [`error`] - Error types and handling
//! - [`config`] - Run parameters and scenario loading
//! - [`sampler`] - Seedable randomness
//! - [`report`] - JSON run summaries
//!
//! ## Quick Start
//!
//! ```rust
//! use airspace_alloc::*;
//!
//! let grid = TimeExpandedGrid::open(3, 3, 20).unwrap();
//! let agents = vec![
//!     Agent::normal(1, Cell::new(0, 0), Cell::new(2, 2), 10.0),
//!     Agent::normal(2, Cell::new(2, 0), Cell::new(0, 2), 10.0),
//! ];
//! let result = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(7)).unwrap();
//! assert_eq!(result.count(AgentStatus::Assigned), 2);
//! ```

pub mod airspace;
pub mod allocator;
pub mod config;
pub mod error;
pub mod logger;
pub mod market;
pub mod planning;
pub mod report;
pub mod sampler;
pub mod types;

pub use airspace::TimeExpandedGrid;
pub use allocator::{AgentOutcome, AllocationResult, OutcomeReason, RoundRecord, allocate};
pub use config::{RunParams, ScenarioConfig};
pub use error::*;
pub use market::{PriceTable, PricingStrategy};
pub use sampler::{ScriptedSource, SeededSource, ValueSource};
pub use types::*;
