//! Bidding phase of an auction round
//!
//! Each active agent plans under the round's prices, bids if the route fits
//! its budget, and otherwise either exits or bans its most expensive cell and
//! replans. Agents are independent within a round, so the coordinator fans
//! them out over scoped worker threads that only read the round-start grid
//! snapshot and the price table.

use super::pricing::PriceTable;
use crate::airspace::TimeExpandedGrid;
use crate::error::{Error, Result};
use crate::planning::{CostMode, PlanRequest, plan};
use crate::sampler::ValueSource;
use crate::types::{Agent, AgentId, Cell, Path, cell_map};
use crate::{auction_debug, auction_info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::thread;

/// Configuration for the bidding phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chance that an over-budget agent gives up instead of rerouting
    pub exit_probability: f64,
    /// Worker threads used for per-agent planning; 0 means one per core
    pub planning_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exit_probability: 0.1,
            planning_workers: 0,
        }
    }
}

/// An agent's priced commitment to a full path for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub agent: AgentId,
    pub path: Path,
    pub budget: f64,
    /// Sum of prices over the path's distinct cells
    pub total_cost: f64,
    /// `(budget / total_cost) * price(cell)` for every distinct cell
    #[serde(with = "cell_map")]
    pub contributions: BTreeMap<Cell, f64>,
    /// Sum of the contributions; equals `budget` whenever `total_cost > 0`
    pub value: f64,
}

impl Bid {
    pub fn new(agent: AgentId, path: Path, budget: f64, prices: &PriceTable) -> Self {
        let cells = path.distinct_cells();
        let total_cost = prices.cost_of(&cells);
        let ratio = if total_cost > 0.0 { budget / total_cost } else { 0.0 };
        let contributions: BTreeMap<Cell, f64> =
            cells.into_iter().map(|c| (c, ratio * prices.price(c))).collect();
        let value = contributions.values().sum();
        Self {
            agent,
            path,
            budget,
            total_cost,
            contributions,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Lost the exit draw while over budget
    VoluntaryExit,
    /// Banned as many cells as the first route had and is still over budget
    RetriesExhausted,
    /// No route exists under the current reservations
    NoRoute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BidderOutcome {
    Bid(Bid),
    Exited(ExitReason),
}

/// What one agent did during the bidding phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidderReport {
    pub agent: AgentId,
    pub outcome: BidderOutcome,
    /// Planning attempts, the first one included
    pub attempts: u32,
    pub excluded: Vec<Cell>,
}

impl BidderReport {
    pub fn bid(&self) -> Option<&Bid> {
        match &self.outcome {
            BidderOutcome::Bid(bid) => Some(bid),
            BidderOutcome::Exited(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuctionCoordinator {
    config: Config,
}

impl AuctionCoordinator {
    pub fn new(config: Config) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.exit_probability) {
            return Err(Error::invalid(format!(
                "exit probability must lie in [0, 1], got {}",
                config.exit_probability
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the bid / reroute loop for a single agent.
    pub fn bid_for<S: ValueSource>(
        &self,
        agent: &Agent,
        grid: &TimeExpandedGrid,
        prices: &PriceTable,
        source: &mut S,
    ) -> BidderReport {
        let mut excluded: HashSet<Cell> = HashSet::new();
        let mut cap: Option<usize> = None;
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            let request = PlanRequest::new(agent.id, agent.start, agent.goal, grid)
                .with_excluded(&excluded)
                .with_cost(CostMode::PriceWeighted(prices));
            let path = match plan(&request) {
                Ok(path) => path,
                Err(e) => {
                    auction_debug!("{} found no route: {}", agent.id, e);
                    let reason = if excluded.is_empty() {
                        ExitReason::NoRoute
                    } else {
                        ExitReason::RetriesExhausted
                    };
                    break BidderOutcome::Exited(reason);
                }
            };

            let cells = path.distinct_cells();
            let total_cost = prices.cost_of(&cells);
            let cap = *cap.get_or_insert(cells.len());

            if total_cost <= agent.budget {
                break BidderOutcome::Bid(Bid::new(agent.id, path, agent.budget, prices));
            }
            if source.chance(self.config.exit_probability) {
                break BidderOutcome::Exited(ExitReason::VoluntaryExit);
            }
            if excluded.len() >= cap {
                break BidderOutcome::Exited(ExitReason::RetriesExhausted);
            }

            // most expensive excludable cell, lower cell on ties
            let worst = cells
                .iter()
                .copied()
                .filter(|c| *c != agent.start && *c != agent.goal && !excluded.contains(c))
                .fold(None, |best: Option<(Cell, f64)>, c| {
                    let p = prices.price(c);
                    match best {
                        Some((_, bp)) if bp >= p => best,
                        _ => Some((c, p)),
                    }
                });
            let Some((worst, price)) = worst else {
                break BidderOutcome::Exited(ExitReason::RetriesExhausted);
            };
            auction_debug!(
                "{} over budget ({:.2} > {:.2}), excluding {} at {:.2}",
                agent.id,
                total_cost,
                agent.budget,
                worst,
                price
            );
            excluded.insert(worst);
        };

        let mut excluded: Vec<Cell> = excluded.into_iter().collect();
        excluded.sort();
        BidderReport {
            agent: agent.id,
            outcome,
            attempts,
            excluded,
        }
    }

    /// Runs the bidding phase for all `agents` and returns one report per
    /// agent, ordered by id.
    ///
    /// Each agent gets its own child of `source`, split in id order before any
    /// worker starts, so the result does not depend on thread scheduling.
    pub fn run_round<S: ValueSource>(
        &self,
        agents: &[&Agent],
        grid: &TimeExpandedGrid,
        prices: &PriceTable,
        source: &mut S,
    ) -> Vec<BidderReport> {
        let mut ordered: Vec<&Agent> = agents.to_vec();
        ordered.sort_by_key(|a| a.id);
        let mut jobs: Vec<(&Agent, S)> = ordered.into_iter().map(|a| (a, source.split())).collect();
        if jobs.is_empty() {
            return Vec::new();
        }

        let workers = match self.config.planning_workers {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
        .clamp(1, jobs.len());
        let chunk = jobs.len().div_ceil(workers);

        let reports = Mutex::new(Vec::with_capacity(jobs.len()));
        thread::scope(|scope| {
            for batch in jobs.chunks_mut(chunk) {
                let reports = &reports;
                scope.spawn(move || {
                    for (agent, src) in batch.iter_mut() {
                        let report = self.bid_for(*agent, grid, prices, src);
                        reports.lock().push(report);
                    }
                });
            }
        });

        let mut reports = reports.into_inner();
        reports.sort_by_key(|r| r.agent);
        let bids = reports.iter().filter(|r| r.bid().is_some()).count();
        auction_info!(
            "bidding phase: {} agents, {} bids, {} exits",
            reports.len(),
            bids,
            reports.len() - bids
        );
        reports
    }
}
