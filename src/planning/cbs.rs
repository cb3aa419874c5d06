//! Conflict-Based Search (CBS) over the time-expanded grid
//!
//! The high level is a best-first search over a tree of constraint sets. Each
//! node holds one candidate path per agent; expanding a node finds the
//! earliest pairwise conflict and branches into two children, each forbidding
//! one of the two agents from the conflicting cell or move. Only the
//! constrained agent is replanned, every other path is shared with the parent.

use super::astar::{PlanRequest, plan};
use super::conflicts::{Conflict, first_conflict};
use super::constraints::ConstraintChain;
use crate::airspace::TimeExpandedGrid;
use crate::error::{Error, Result};
use crate::market::pricing::Heatmap;
use crate::types::{Agent, AgentId, Path};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::sync::Arc;

/// Configuration for the CBS solver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of node expansions before giving up
    pub max_nodes: usize,
    /// First conflicts found at nodes up to this depth feed the congestion
    /// heatmap
    pub congestion_depth: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_nodes: 1000,
            congestion_depth: 2,
        }
    }
}

impl Config {
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_congestion_depth(mut self, depth: u32) -> Self {
        self.congestion_depth = depth;
        self
    }
}

/// A jointly conflict-free set of paths
#[derive(Debug, Clone)]
pub struct CbsSolution {
    pub paths: BTreeMap<AgentId, Path>,
    /// Sum of path step counts
    pub cost: usize,
    pub expanded: usize,
}

struct ConflictTreeNode {
    constraints: Option<Arc<ConstraintChain>>,
    constraint_count: usize,
    paths: Vec<Arc<Path>>,
    cost: usize,
    depth: u32,
    seq: u64,
}

impl Ord for ConflictTreeNode {
    // min-heap on (cost, constraint count, insertion order)
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.constraint_count.cmp(&self.constraint_count))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ConflictTreeNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ConflictTreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ConflictTreeNode {}

/// CBS solver bound to one grid.
///
/// The grid's reservations act as fixed obstacles for every agent. After a
/// call to [`CbsSolver::solve`], [`CbsSolver::conflict_stats`] holds the
/// per-cell count of distinct first conflicts seen near the root.
pub struct CbsSolver<'g> {
    grid: &'g TimeExpandedGrid,
    config: Config,
    stats: Heatmap,
    seen: HashSet<Conflict>,
    expanded: usize,
    next_seq: u64,
}

impl<'g> CbsSolver<'g> {
    pub fn new(grid: &'g TimeExpandedGrid, config: Config) -> Self {
        Self {
            grid,
            config,
            stats: Heatmap::default(),
            seen: HashSet::new(),
            expanded: 0,
            next_seq: 0,
        }
    }

    pub fn conflict_stats(&self) -> &Heatmap {
        &self.stats
    }

    pub fn expanded(&self) -> usize {
        self.expanded
    }

    /// Searches for a conflict-free joint plan.
    ///
    /// # Returns
    ///
    /// * `Ok(solution)` - every agent has a path and no pair conflicts
    /// * `Err(Error::PlanningFailure)` - some agent has no path even alone
    /// * `Err(Error::CbsExhausted)` - the tree emptied or the node budget ran out
    pub fn solve(&mut self, agents: &[Agent]) -> Result<CbsSolution> {
        self.stats = Heatmap::default();
        self.seen.clear();
        self.expanded = 0;
        self.next_seq = 0;

        let mut agents: Vec<&Agent> = agents.iter().collect();
        agents.sort_by_key(|a| a.id);
        let ids: Vec<AgentId> = agents.iter().map(|a| a.id).collect();

        let mut root_paths = Vec::with_capacity(agents.len());
        for agent in &agents {
            let path = plan(&PlanRequest::new(agent.id, agent.start, agent.goal, self.grid))?;
            root_paths.push(Arc::new(path));
        }
        let root = self.node(None, 0, root_paths, 0);

        let mut open = BinaryHeap::new();
        open.push(root);

        while let Some(node) = open.pop() {
            if self.expanded >= self.config.max_nodes {
                cbs_debug!("node budget of {} reached", self.config.max_nodes);
                return Err(Error::CbsExhausted {
                    expanded: self.expanded,
                });
            }
            self.expanded += 1;

            let view: Vec<(AgentId, &Path)> = ids
                .iter()
                .zip(&node.paths)
                .map(|(id, p)| (*id, p.as_ref()))
                .collect();
            let Some(conflict) = first_conflict(&view, self.grid.landing_hold()) else {
                cbs_debug!(
                    "solved {} agents with cost {} after {} expansions",
                    ids.len(),
                    node.cost,
                    self.expanded
                );
                let paths = ids
                    .iter()
                    .zip(node.paths)
                    .map(|(id, p)| (*id, Arc::unwrap_or_clone(p)))
                    .collect();
                return Ok(CbsSolution {
                    paths,
                    cost: node.cost,
                    expanded: self.expanded,
                });
            };

            if node.depth <= self.config.congestion_depth {
                self.record(conflict);
            }

            for agent in [conflict.first, conflict.second] {
                let Some(idx) = ids.iter().position(|id| *id == agent) else {
                    continue;
                };
                let chain = ConstraintChain::push(node.constraints.clone(), conflict.constraint_for(agent));
                let constraints = ConstraintChain::for_agent(Some(&*chain), agent);
                let a = agents[idx];
                let request = PlanRequest::new(agent, a.start, a.goal, self.grid).with_constraints(&constraints);
                match plan(&request) {
                    Ok(path) => {
                        let mut paths = node.paths.clone();
                        paths[idx] = Arc::new(path);
                        let child = self.node(Some(chain), node.constraint_count + 1, paths, node.depth + 1);
                        open.push(child);
                    }
                    Err(e) => {
                        cbs_debug!("pruned branch constraining {}: {}", agent, e);
                    }
                }
            }
        }

        cbs_debug!("constraint tree exhausted after {} expansions", self.expanded);
        Err(Error::CbsExhausted {
            expanded: self.expanded,
        })
    }

    fn node(
        &mut self,
        constraints: Option<Arc<ConstraintChain>>,
        constraint_count: usize,
        paths: Vec<Arc<Path>>,
        depth: u32,
    ) -> ConflictTreeNode {
        let cost = paths.iter().map(|p| p.steps()).sum();
        let seq = self.next_seq;
        self.next_seq += 1;
        ConflictTreeNode {
            constraints,
            constraint_count,
            paths,
            cost,
            depth,
            seq,
        }
    }

    fn record(&mut self, conflict: Conflict) {
        if self.seen.insert(conflict) {
            for cell in conflict.cells() {
                self.stats.bump(cell, 1);
            }
        }
    }
}

/// Plans every agent alone against `grid`, ignoring the other agents.
///
/// Returns the paths that exist and the planning failures, both keyed by id.
pub fn plan_independently(
    grid: &TimeExpandedGrid,
    agents: &[Agent],
) -> (BTreeMap<AgentId, Path>, BTreeMap<AgentId, Error>) {
    let mut paths = BTreeMap::new();
    let mut failures = BTreeMap::new();
    for agent in agents {
        match plan(&PlanRequest::new(agent.id, agent.start, agent.goal, grid)) {
            Ok(path) => {
                paths.insert(agent.id, path);
            }
            Err(e) => {
                failures.insert(agent.id, e);
            }
        }
    }
    (paths, failures)
}
