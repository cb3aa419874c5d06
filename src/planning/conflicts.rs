//! Pairwise vertex and edge conflict detection between timed paths

use super::constraints::Constraint;
use crate::types::{AgentId, Cell, Path, Timestep};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Both agents occupy `cell` at `time`.
    Vertex { cell: Cell, time: Timestep },
    /// `first` moves `from -> to` while `second` moves `to -> from`, both
    /// arriving at `time`.
    Edge { from: Cell, to: Cell, time: Timestep },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conflict {
    pub first: AgentId,
    pub second: AgentId,
    pub kind: ConflictKind,
}

impl Conflict {
    pub fn time(&self) -> Timestep {
        match self.kind {
            ConflictKind::Vertex { time, .. } | ConflictKind::Edge { time, .. } => time,
        }
    }

    /// Cells involved in the conflict (two for a swap).
    pub fn cells(&self) -> Vec<Cell> {
        match self.kind {
            ConflictKind::Vertex { cell, .. } => vec![cell],
            ConflictKind::Edge { from, to, .. } => vec![from, to],
        }
    }

    /// The constraint that removes this conflict from `agent`'s side.
    pub fn constraint_for(&self, agent: AgentId) -> Constraint {
        match self.kind {
            ConflictKind::Vertex { cell, time } => Constraint::vertex(agent, cell, time),
            ConflictKind::Edge { from, to, time } if agent == self.first => {
                Constraint::edge(agent, from, to, time)
            }
            ConflictKind::Edge { from, to, time } => Constraint::edge(agent, to, from, time),
        }
    }
}

/// Earliest conflict among `paths`, scanning time first, vertex conflicts
/// before edge conflicts at the same time, then agents in slice order.
pub fn first_conflict(paths: &[(AgentId, &Path)], landing_hold: Timestep) -> Option<Conflict> {
    let last = paths.iter().map(|(_, p)| p.end_time(landing_hold)).max()?;

    for t in 0..=last {
        let mut occupied: HashMap<Cell, AgentId> = HashMap::with_capacity(paths.len());
        for (agent, path) in paths {
            let Some(cell) = path.position_at(t, landing_hold) else {
                continue;
            };
            if let Some(&other) = occupied.get(&cell) {
                return Some(Conflict {
                    first: other,
                    second: *agent,
                    kind: ConflictKind::Vertex { cell, time: t },
                });
            }
            occupied.insert(cell, *agent);
        }

        if t == 0 {
            continue;
        }
        for (i, (a, pa)) in paths.iter().enumerate() {
            let (Some(a_prev), Some(a_now)) = (pa.position_at(t - 1, landing_hold), pa.position_at(t, landing_hold))
            else {
                continue;
            };
            if a_prev == a_now {
                continue;
            }
            for (b, pb) in &paths[i + 1..] {
                if pb.position_at(t - 1, landing_hold) == Some(a_now) && pb.position_at(t, landing_hold) == Some(a_prev) {
                    return Some(Conflict {
                        first: *a,
                        second: *b,
                        kind: ConflictKind::Edge {
                            from: a_prev,
                            to: a_now,
                            time: t,
                        },
                    });
                }
            }
        }
    }
    None
}

/// True when no pair of paths has a vertex or edge conflict.
pub fn is_conflict_free(paths: &[(AgentId, &Path)], landing_hold: Timestep) -> bool {
    first_conflict(paths, landing_hold).is_none()
}
