//! Commit phase of an auction round

use super::auction::Bid;
use crate::airspace::TimeExpandedGrid;
use crate::auction_debug;
use crate::types::{AgentId, Cell, Timestep};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed,
    /// The bid's path first hit an existing reservation at `cell`, `time`
    Rejected { cell: Cell, time: Timestep },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub agent: AgentId,
    pub value: f64,
    pub outcome: CommitOutcome,
}

/// Commits winning bids into the grid, highest value first.
pub struct ConflictResolver<'g> {
    grid: &'g mut TimeExpandedGrid,
}

impl<'g> ConflictResolver<'g> {
    pub fn new(grid: &'g mut TimeExpandedGrid) -> Self {
        Self { grid }
    }

    /// Orders bids by value (descending) then agent id (ascending).
    pub fn order(bids: &[Bid]) -> Vec<&Bid> {
        let mut ordered: Vec<&Bid> = bids.iter().collect();
        ordered.sort_by(|a, b| b.value.total_cmp(&a.value).then(a.agent.cmp(&b.agent)));
        ordered
    }

    /// Walks the bids in priority order, committing each path that still fits.
    ///
    /// Returns one resolution per bid in the order they were examined. A bid
    /// that loses is not retried within this phase.
    pub fn resolve(&mut self, bids: &[Bid]) -> Vec<Resolution> {
        let mut resolutions = Vec::with_capacity(bids.len());
        for bid in Self::order(bids) {
            // try_commit checks first_conflict before touching the grid
            let outcome = match self.grid.try_commit(bid.agent, &bid.path) {
                Ok(()) => CommitOutcome::Committed,
                Err((cell, time)) => CommitOutcome::Rejected { cell, time },
            };
            match outcome {
                CommitOutcome::Committed => {
                    auction_debug!("{} committed (value {:.2})", bid.agent, bid.value)
                }
                CommitOutcome::Rejected { cell, time } => {
                    auction_debug!("{} rejected at {} t={}", bid.agent, cell, time)
                }
            }
            resolutions.push(Resolution {
                agent: bid.agent,
                value: bid.value,
                outcome,
            });
        }
        resolutions
    }
}
