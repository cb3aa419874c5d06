//! Top-level allocation run
//!
//! [`allocate`] steps through the whole pipeline for one set of agents:
//!
//! 1. emergency agents are planned jointly (falling back to one at a time) and
//!    committed as permanent reservations
//! 2. normal agents that cannot reach their goal even alone are dropped
//! 3. the rest are planned jointly with CBS; success ends the run
//! 4. otherwise congestion prices seed an auction that runs round by round
//!    until nobody is bidding or `max_rounds` is hit

use crate::airspace::TimeExpandedGrid;
use crate::config::RunParams;
use crate::error::{Error, Result};
use crate::market::auction::{AuctionCoordinator, Bid, BidderOutcome, ExitReason};
use crate::market::logging::{log_outcome_table, log_round_summary};
use crate::market::pricing::{Heatmap, PriceTable};
use crate::market::resolver::{CommitOutcome, ConflictResolver};
use crate::planning::cbs::{CbsSolver, plan_independently};
use crate::planning::{PlanRequest, plan};
use crate::sampler::ValueSource;
use crate::types::{Agent, AgentId, AgentStatus, Cell, Path, Priority};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Why an agent ended in its final state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    /// Assigned by the joint CBS plan
    Cbs,
    /// Emergency agent committed before everyone else
    Emergency,
    /// Won an auction round
    Auction,
    VoluntaryExit,
    RetriesExhausted,
    NoRoute,
    /// No path exists even with no other normal agent around
    Unreachable,
    /// Still bidding when the round limit was reached
    AuctionExhausted,
}

impl From<ExitReason> for OutcomeReason {
    fn from(reason: ExitReason) -> Self {
        match reason {
            ExitReason::VoluntaryExit => OutcomeReason::VoluntaryExit,
            ExitReason::RetriesExhausted => OutcomeReason::RetriesExhausted,
            ExitReason::NoRoute => OutcomeReason::NoRoute,
        }
    }
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeReason::Cbs => "cbs",
            OutcomeReason::Emergency => "emergency",
            OutcomeReason::Auction => "auction",
            OutcomeReason::VoluntaryExit => "voluntary exit",
            OutcomeReason::RetriesExhausted => "retries exhausted",
            OutcomeReason::NoRoute => "no route",
            OutcomeReason::Unreachable => "unreachable",
            OutcomeReason::AuctionExhausted => "auction exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent: AgentId,
    pub priority: Priority,
    pub status: AgentStatus,
    pub reason: OutcomeReason,
    /// Committed path, for assigned agents only
    pub path: Option<Path>,
    /// Auction round that assigned the agent
    pub round: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRecord {
    pub bid: Bid,
    pub outcome: CommitOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRecord {
    pub agent: AgentId,
    pub reason: ExitReason,
    pub attempts: u32,
    pub excluded: Vec<Cell>,
}

/// Everything that happened in one auction round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    /// Prices the round was played with
    pub prices: PriceTable,
    /// Congestion counts the prices were derived from
    pub heatmap: Heatmap,
    /// Bids in the order the resolver examined them
    pub bids: Vec<BidRecord>,
    pub exits: Vec<ExitRecord>,
    /// Agents still bidding after the commit phase
    pub active_after: usize,
}

impl RoundRecord {
    pub fn committed(&self) -> impl Iterator<Item = &Bid> + '_ {
        self.bids
            .iter()
            .filter(|r| r.outcome.is_committed())
            .map(|r| &r.bid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CbsAttempt {
    pub agents: usize,
    pub expanded: usize,
    pub solved: bool,
    /// Sum of step counts of the solution
    pub cost: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CbsSummary {
    pub emergency: Option<CbsAttempt>,
    pub joint: Option<CbsAttempt>,
    /// Heatmap that seeded the auction, if one ran
    pub congestion: Option<Heatmap>,
}

#[derive(Debug, Clone)]
pub struct AllocationResult {
    /// Agents with their final status, ordered by id
    pub agents: Vec<Agent>,
    pub outcomes: BTreeMap<AgentId, AgentOutcome>,
    pub rounds: Vec<RoundRecord>,
    pub cbs: CbsSummary,
    /// Grid holding every committed reservation
    pub grid: TimeExpandedGrid,
}

impl AllocationResult {
    pub fn outcome(&self, agent: AgentId) -> Option<&AgentOutcome> {
        self.outcomes.get(&agent)
    }

    pub fn path_of(&self, agent: AgentId) -> Option<&Path> {
        self.outcome(agent).and_then(|o| o.path.as_ref())
    }

    pub fn assigned_paths(&self) -> BTreeMap<AgentId, &Path> {
        self.outcomes
            .iter()
            .filter_map(|(id, o)| o.path.as_ref().map(|p| (*id, p)))
            .collect()
    }

    pub fn count(&self, status: AgentStatus) -> usize {
        self.agents.iter().filter(|a| a.status == status).count()
    }

    /// True when the run ended without an auction.
    pub fn solved_without_auction(&self) -> bool {
        self.cbs.congestion.is_none()
    }
}

/// Allocates conflict-free paths to `agents` on `grid`.
///
/// Only `InvalidInput` is returned as an error; every per-agent failure ends
/// up in that agent's [`AgentOutcome`]. `grid` is not modified, the committed
/// reservations are returned in [`AllocationResult::grid`].
pub fn allocate<S: ValueSource>(
    grid: &TimeExpandedGrid,
    agents: &[Agent],
    params: &RunParams,
    source: &mut S,
) -> Result<AllocationResult> {
    params.validate()?;
    validate_agents(grid, agents)?;
    info!(
        "allocating {} agents on a {}x{} grid (horizon {})",
        agents.len(),
        grid.width(),
        grid.height(),
        grid.horizon()
    );

    let mut run = Allocation::new(grid, agents, params);
    run.plan_emergencies()?;
    if let Some(heatmap) = run.plan_jointly()? {
        run.auction(heatmap, source)?;
    }
    Ok(run.finish())
}

fn validate_agents(grid: &TimeExpandedGrid, agents: &[Agent]) -> Result<()> {
    let mut ids = HashSet::new();
    let mut starts: HashMap<Cell, AgentId> = HashMap::new();
    for agent in agents {
        if !ids.insert(agent.id) {
            return Err(Error::invalid(format!("duplicate agent id {}", agent.id)));
        }
        for (what, cell) in [("start", agent.start), ("goal", agent.goal)] {
            if !grid.in_bounds(cell) {
                return Err(Error::invalid(format!("{what} {cell} of {} is out of bounds", agent.id)));
            }
            if grid.is_static_obstacle(cell) {
                return Err(Error::invalid(format!("{what} {cell} of {} is an obstacle", agent.id)));
            }
        }
        if !agent.budget.is_finite() || agent.budget < 0.0 {
            return Err(Error::invalid(format!(
                "budget of {} must be finite and non-negative, got {}",
                agent.id, agent.budget
            )));
        }
        if let Some(other) = starts.insert(agent.start, agent.id) {
            return Err(Error::invalid(format!(
                "{} and {} share start cell {}",
                other, agent.id, agent.start
            )));
        }
    }
    Ok(())
}

struct Allocation<'p> {
    params: &'p RunParams,
    grid: TimeExpandedGrid,
    agents: BTreeMap<AgentId, Agent>,
    outcomes: BTreeMap<AgentId, AgentOutcome>,
    rounds: Vec<RoundRecord>,
    cbs: CbsSummary,
}

impl<'p> Allocation<'p> {
    fn new(grid: &TimeExpandedGrid, agents: &[Agent], params: &'p RunParams) -> Self {
        let agents = agents
            .iter()
            .map(|a| {
                let mut a = a.clone();
                a.status = AgentStatus::Pending;
                (a.id, a)
            })
            .collect();
        Self {
            params,
            grid: grid.clone().with_landing_hold(params.landing_hold),
            agents,
            outcomes: BTreeMap::new(),
            rounds: Vec::new(),
            cbs: CbsSummary::default(),
        }
    }

    fn plan_emergencies(&mut self) -> Result<()> {
        let emergencies: Vec<Agent> = self.agents.values().filter(|a| a.is_emergency()).cloned().collect();
        if emergencies.is_empty() {
            return Ok(());
        }

        let (result, expanded) = {
            let mut solver = CbsSolver::new(&self.grid, self.params.cbs_config());
            (solver.solve(&emergencies), solver.expanded())
        };
        let mut attempt = CbsAttempt {
            agents: emergencies.len(),
            expanded,
            ..Default::default()
        };

        match result {
            Ok(solution) => {
                attempt.solved = true;
                attempt.cost = Some(solution.cost);
                self.cbs.emergency = Some(attempt);
                for (id, path) in solution.paths {
                    self.commit_planned(id, path, OutcomeReason::Emergency)?;
                }
            }
            Err(e) => {
                warn!("joint emergency plan failed ({}), planning in id order", e);
                self.cbs.emergency = Some(attempt);
                for agent in &emergencies {
                    let request = PlanRequest::new(agent.id, agent.start, agent.goal, &self.grid);
                    match plan(&request) {
                        Ok(path) => self.commit_planned(agent.id, path, OutcomeReason::Emergency)?,
                        Err(e) => {
                            warn!("emergency agent {} left unassigned: {}", agent.id, e);
                            self.settle(agent.id, AgentStatus::Unassigned, OutcomeReason::Unreachable)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the reachability check and the joint plan for normal agents.
    /// Returns the congestion heatmap to seed an auction with, or `None` when
    /// nobody is left to bid.
    fn plan_jointly(&mut self) -> Result<Option<Heatmap>> {
        let normals: Vec<Agent> = self.agents.values().filter(|a| !a.is_emergency()).cloned().collect();
        let (solo_paths, failures) = plan_independently(&self.grid, &normals);
        for (id, e) in &failures {
            debug!("{} is unreachable: {}", id, e);
            self.settle(*id, AgentStatus::Unassigned, OutcomeReason::Unreachable)?;
        }
        let reachable: Vec<Agent> = normals.into_iter().filter(|a| solo_paths.contains_key(&a.id)).collect();
        if reachable.is_empty() {
            return Ok(None);
        }

        let (result, expanded, stats) = {
            let mut solver = CbsSolver::new(&self.grid, self.params.cbs_config());
            let result = solver.solve(&reachable);
            (result, solver.expanded(), solver.conflict_stats().clone())
        };
        let mut attempt = CbsAttempt {
            agents: reachable.len(),
            expanded,
            ..Default::default()
        };

        match result {
            Ok(solution) => {
                info!(
                    "joint plan found for {} agents (cost {}, {} expansions)",
                    reachable.len(),
                    solution.cost,
                    solution.expanded
                );
                attempt.solved = true;
                attempt.cost = Some(solution.cost);
                self.cbs.joint = Some(attempt);
                for (id, path) in solution.paths {
                    self.commit_planned(id, path, OutcomeReason::Cbs)?;
                }
                Ok(None)
            }
            Err(e) => {
                info!("joint plan failed ({}), falling back to auction", e);
                self.cbs.joint = Some(attempt);
                // The root is always expanded and recorded at depth 0, so an
                // exhausted search leaves stats behind; overlap counts only
                // cover a solver that gave up before recording anything.
                let heatmap = if stats.is_empty() {
                    Heatmap::from_overlap(solo_paths.values())
                } else {
                    stats
                };
                self.cbs.congestion = Some(heatmap.clone());
                for agent in &reachable {
                    self.transition(agent.id, AgentStatus::Bidding)?;
                }
                Ok(Some(heatmap))
            }
        }
    }

    fn auction<S: ValueSource>(&mut self, mut heatmap: Heatmap, source: &mut S) -> Result<()> {
        let pricer = self.params.pricer()?;
        let coordinator = AuctionCoordinator::new(self.params.auction_config())?;

        for round in 1..=self.params.max_rounds {
            let active: Vec<Agent> = self
                .agents
                .values()
                .filter(|a| a.status == AgentStatus::Bidding)
                .cloned()
                .collect();
            if active.is_empty() {
                break;
            }

            let prices = pricer.price_table(&heatmap);
            let reports = {
                let snapshot = self.grid.clone();
                let bidders: Vec<&Agent> = active.iter().collect();
                coordinator.run_round(&bidders, &snapshot, &prices, source)
            };

            let mut bids = Vec::new();
            let mut exits = Vec::new();
            for report in reports {
                match report.outcome {
                    BidderOutcome::Bid(bid) => {
                        self.transition(bid.agent, AgentStatus::WinnerCandidate)?;
                        bids.push(bid);
                    }
                    BidderOutcome::Exited(reason) => {
                        self.settle(report.agent, AgentStatus::Exited, reason.into())?;
                        exits.push(ExitRecord {
                            agent: report.agent,
                            reason,
                            attempts: report.attempts,
                            excluded: report.excluded,
                        });
                    }
                }
            }

            let resolutions = ConflictResolver::new(&mut self.grid).resolve(&bids);
            let mut pending: BTreeMap<AgentId, Bid> = bids.into_iter().map(|b| (b.agent, b)).collect();
            let priced_with = heatmap.clone();
            let mut records = Vec::with_capacity(resolutions.len());
            for resolution in resolutions {
                let Some(bid) = pending.remove(&resolution.agent) else {
                    continue;
                };
                match resolution.outcome {
                    CommitOutcome::Committed => {
                        self.assign(bid.agent, bid.path.clone(), OutcomeReason::Auction, Some(round))?;
                    }
                    CommitOutcome::Rejected { cell, .. } => {
                        self.transition(bid.agent, AgentStatus::Bidding)?;
                        heatmap.bump(cell, 1);
                    }
                }
                records.push(BidRecord {
                    bid,
                    outcome: resolution.outcome,
                });
            }

            let record = RoundRecord {
                round,
                prices,
                heatmap: priced_with,
                bids: records,
                exits,
                active_after: self.active_count(),
            };
            log_round_summary(&record);
            self.rounds.push(record);
        }

        let leftover: Vec<AgentId> = self
            .agents
            .values()
            .filter(|a| a.status.is_active())
            .map(|a| a.id)
            .collect();
        if !leftover.is_empty() {
            let e = Error::AuctionExhausted {
                rounds: self.rounds.len() as u32,
                unresolved: leftover.len(),
            };
            warn!("{}", e);
            for id in leftover {
                self.settle(id, AgentStatus::Unassigned, OutcomeReason::AuctionExhausted)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> AllocationResult {
        log_outcome_table(&self.outcomes);
        AllocationResult {
            agents: self.agents.into_values().collect(),
            outcomes: self.outcomes,
            rounds: self.rounds,
            cbs: self.cbs,
            grid: self.grid,
        }
    }

    fn active_count(&self) -> usize {
        self.agents.values().filter(|a| a.status.is_active()).count()
    }

    fn transition(&mut self, id: AgentId, next: AgentStatus) -> Result<()> {
        self.agents
            .get_mut(&id)
            .ok_or_else(|| Error::invalid(format!("unknown agent {id}")))?
            .transition(next)
    }

    fn record(&mut self, id: AgentId, reason: OutcomeReason, path: Option<Path>, round: Option<u32>) {
        if let Some(agent) = self.agents.get(&id) {
            self.outcomes.insert(
                id,
                AgentOutcome {
                    agent: id,
                    priority: agent.priority,
                    status: agent.status,
                    reason,
                    path,
                    round,
                },
            );
        }
    }

    fn settle(&mut self, id: AgentId, status: AgentStatus, reason: OutcomeReason) -> Result<()> {
        self.transition(id, status)?;
        self.record(id, reason, None, None);
        Ok(())
    }

    fn assign(&mut self, id: AgentId, path: Path, reason: OutcomeReason, round: Option<u32>) -> Result<()> {
        self.transition(id, AgentStatus::Assigned)?;
        self.record(id, reason, Some(path), round);
        Ok(())
    }

    /// Commits a path found by CBS or by prioritized planning.
    fn commit_planned(&mut self, id: AgentId, path: Path, reason: OutcomeReason) -> Result<()> {
        self.transition(id, AgentStatus::Planned)?;
        match self.grid.try_commit(id, &path) {
            Ok(()) => self.assign(id, path, reason, None),
            Err((cell, time)) => {
                warn!("planned path of {} collides at {} t={}", id, cell, time);
                self.settle(id, AgentStatus::Unassigned, OutcomeReason::Unreachable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{ScriptedSource, SeededSource};

    fn c(x: i32, y: i32) -> Cell {
        Cell::new(x, y)
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let grid = TimeExpandedGrid::open(3, 3, 10).unwrap();
        let agents = vec![
            Agent::normal(1, c(0, 0), c(2, 2), 5.0),
            Agent::normal(1, c(1, 0), c(2, 1), 5.0),
        ];
        let err = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_start_on_obstacle_and_shared_starts() {
        let grid = TimeExpandedGrid::new(3, 3, 10, [c(1, 1)]).unwrap();
        let params = RunParams::default();
        let on_obstacle = vec![Agent::normal(1, c(1, 1), c(2, 2), 5.0)];
        assert!(allocate(&grid, &on_obstacle, &params, &mut SeededSource::new(1)).is_err());

        let shared = vec![
            Agent::normal(1, c(0, 0), c(2, 2), 5.0),
            Agent::normal(2, c(0, 0), c(2, 0), 5.0),
        ];
        assert!(allocate(&grid, &shared, &params, &mut SeededSource::new(1)).is_err());
    }

    #[test]
    fn test_rejects_negative_budget() {
        let grid = TimeExpandedGrid::open(3, 3, 10).unwrap();
        let agents = vec![Agent::normal(1, c(0, 0), c(2, 2), -1.0)];
        let err = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_joint_plan_skips_auction() {
        let grid = TimeExpandedGrid::open(3, 3, 20).unwrap();
        let agents = vec![
            Agent::normal(1, c(0, 0), c(2, 2), 10.0),
            Agent::normal(2, c(2, 0), c(0, 2), 10.0),
        ];
        let result = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).unwrap();
        assert!(result.solved_without_auction());
        assert!(result.rounds.is_empty());
        assert_eq!(result.count(AgentStatus::Assigned), 2);
        assert_eq!(result.outcome(AgentId(1)).unwrap().reason, OutcomeReason::Cbs);
        assert!(result.cbs.joint.as_ref().unwrap().solved);
    }

    #[test]
    fn test_unreachable_agent_is_unassigned() {
        let grid = TimeExpandedGrid::new(3, 1, 10, [c(1, 0)]).unwrap();
        let agents = vec![Agent::normal(1, c(0, 0), c(2, 0), 10.0)];
        let result = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).unwrap();
        let outcome = result.outcome(AgentId(1)).unwrap();
        assert_eq!(outcome.status, AgentStatus::Unassigned);
        assert_eq!(outcome.reason, OutcomeReason::Unreachable);
        assert!(outcome.path.is_none());
    }

    #[test]
    fn test_zero_rounds_leaves_bidders_unassigned() {
        let grid = TimeExpandedGrid::open(3, 1, 8).unwrap();
        let agents = vec![
            Agent::normal(1, c(0, 0), c(2, 0), 10.0),
            Agent::normal(2, c(2, 0), c(0, 0), 10.0),
        ];
        let params = RunParams::default().with_max_rounds(0).with_max_cbs_nodes(50);
        let result = allocate(&grid, &agents, &params, &mut ScriptedSource::constant(0.9)).unwrap();
        assert!(!result.solved_without_auction());
        assert!(result.rounds.is_empty());
        for outcome in result.outcomes.values() {
            assert_eq!(outcome.status, AgentStatus::Unassigned);
            assert_eq!(outcome.reason, OutcomeReason::AuctionExhausted);
        }
    }

    #[test]
    fn test_emergency_is_committed_first() {
        let grid = TimeExpandedGrid::open(3, 3, 20).unwrap();
        let agents = vec![
            Agent::normal(1, c(0, 1), c(2, 1), 10.0),
            Agent::emergency(2, c(1, 0), c(1, 2)),
        ];
        let result = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).unwrap();
        let emergency = result.outcome(AgentId(2)).unwrap();
        assert_eq!(emergency.reason, OutcomeReason::Emergency);
        // a lone emergency agent flies its shortest path untouched
        assert_eq!(emergency.path.as_ref().unwrap().steps(), 2);
        assert_eq!(result.outcome(AgentId(1)).unwrap().status, AgentStatus::Assigned);
    }
}
