//! Search-time constraints produced by conflict-based search

use crate::types::{AgentId, Cell, Timestep};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// The agent may not occupy `cell` at `time`.
    Vertex { cell: Cell, time: Timestep },
    /// The agent may not move `from -> to` arriving at `time`.
    Edge { from: Cell, to: Cell, time: Timestep },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    pub agent: AgentId,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn vertex(agent: AgentId, cell: Cell, time: Timestep) -> Self {
        Self {
            agent,
            kind: ConstraintKind::Vertex { cell, time },
        }
    }

    pub fn edge(agent: AgentId, from: Cell, to: Cell, time: Timestep) -> Self {
        Self {
            agent,
            kind: ConstraintKind::Edge { from, to, time },
        }
    }
}

/// Constraints applying to a single agent, indexed for the planner.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    vertex: HashSet<(Cell, Timestep)>,
    edge: HashSet<(Cell, Cell, Timestep)>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ConstraintKind) {
        match kind {
            ConstraintKind::Vertex { cell, time } => {
                self.vertex.insert((cell, time));
            }
            ConstraintKind::Edge { from, to, time } => {
                self.edge.insert((from, to, time));
            }
        }
    }

    pub fn forbids_vertex(&self, cell: Cell, time: Timestep) -> bool {
        self.vertex.contains(&(cell, time))
    }

    pub fn forbids_move(&self, from: Cell, to: Cell, time: Timestep) -> bool {
        self.forbids_vertex(to, time) || self.edge.contains(&(from, to, time))
    }

    pub fn len(&self) -> usize {
        self.vertex.len() + self.edge.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persistent list of constraints shared between conflict-tree nodes.
///
/// A child node links to its parent's chain and adds exactly one constraint,
/// so branching never copies the constraints already on the path to the root.
#[derive(Debug)]
pub struct ConstraintChain {
    constraint: Constraint,
    parent: Option<Arc<ConstraintChain>>,
}

impl ConstraintChain {
    pub fn push(parent: Option<Arc<ConstraintChain>>, constraint: Constraint) -> Arc<ConstraintChain> {
        Arc::new(ConstraintChain { constraint, parent })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        std::iter::successors(Some(self), |&link| link.parent.as_deref()).map(|link| &link.constraint)
    }

    /// Collects the constraints that apply to `agent`.
    pub fn for_agent(chain: Option<&ConstraintChain>, agent: AgentId) -> ConstraintSet {
        let mut set = ConstraintSet::new();
        if let Some(chain) = chain {
            for c in chain.iter().filter(|c| c.agent == agent) {
                set.insert(c.kind);
            }
        }
        set
    }
}
