//! Core types shared by the grid, planners and the market

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// Discrete time index on the time-expanded grid
pub type Timestep = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct AgentId(pub u32);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Grid coordinate. Ordering is lexicographic on `(x, y)`, which is the
/// tie-break order used by the planners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: Cell) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// The four orthogonal neighbours, unchecked against any bounds.
    pub fn adjacent(&self) -> [Cell; 4] {
        [
            Cell::new(self.x - 1, self.y),
            Cell::new(self.x, self.y - 1),
            Cell::new(self.x, self.y + 1),
            Cell::new(self.x + 1, self.y),
        ]
    }

    pub fn is_adjacent(&self, other: Cell) -> bool {
        self.manhattan(other) == 1
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(i32, i32)> for Cell {
    fn from((x, y): (i32, i32)) -> Self {
        Cell::new(x, y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Emergency,
    #[default]
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Pending,
    Planned,
    Bidding,
    WinnerCandidate,
    Assigned,
    Exited,
    Unassigned,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Assigned | Self::Exited | Self::Unassigned)
    }

    /// Agents that still take part in an auction round
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Bidding)
    }

    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (self, next) {
            (Pending, Planned | Bidding | Unassigned) => true,
            (Planned, Assigned | Unassigned) => true,
            (Bidding, WinnerCandidate | Exited | Unassigned) => true,
            (WinnerCandidate, Assigned | Bidding | Unassigned) => true,
            _ => false,
        }
    }
}

/// An aerial agent requesting a path through the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub start: Cell,
    pub goal: Cell,
    #[serde(default)]
    pub priority: Priority,
    pub budget: f64,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    pub fn new(id: u32, start: Cell, goal: Cell, priority: Priority, budget: f64) -> Self {
        Self {
            id: AgentId(id),
            start,
            goal,
            priority,
            budget,
            status: AgentStatus::Pending,
        }
    }

    pub fn normal(id: u32, start: Cell, goal: Cell, budget: f64) -> Self {
        Self::new(id, start, goal, Priority::Normal, budget)
    }

    pub fn emergency(id: u32, start: Cell, goal: Cell) -> Self {
        Self::new(id, start, goal, Priority::Emergency, 0.0)
    }

    pub fn is_emergency(&self) -> bool {
        self.priority == Priority::Emergency
    }

    /// Moves the agent along its state machine.
    pub fn transition(&mut self, next: AgentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::invalid(format!(
                "agent {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Waypoint {
    pub cell: Cell,
    pub time: Timestep,
}

/// A time-stamped path. The cell at index `t` is the position at timestep `t`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    cells: Vec<Cell>,
}

impl Path {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn start(&self) -> Option<Cell> {
        self.cells.first().copied()
    }

    pub fn goal(&self) -> Option<Cell> {
        self.cells.last().copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of actions (moves and waits), used as the path cost in CBS.
    pub fn steps(&self) -> usize {
        self.cells.len().saturating_sub(1)
    }

    pub fn arrival(&self) -> Timestep {
        self.steps() as Timestep
    }

    /// Last timestep at which the agent occupies airspace, hold included.
    pub fn end_time(&self, landing_hold: Timestep) -> Timestep {
        self.arrival() + landing_hold
    }

    /// Position at `time`, holding the goal for `landing_hold` steps after
    /// arrival. `None` once the agent has left the airspace.
    pub fn position_at(&self, time: Timestep, landing_hold: Timestep) -> Option<Cell> {
        let idx = time as usize;
        if idx < self.cells.len() {
            Some(self.cells[idx])
        } else if time <= self.end_time(landing_hold) {
            self.goal()
        } else {
            None
        }
    }

    pub fn waypoints(&self) -> impl Iterator<Item = Waypoint> + '_ {
        self.cells.iter().enumerate().map(|(t, &cell)| Waypoint {
            cell,
            time: t as Timestep,
        })
    }

    /// Waypoints including the landing hold at the goal.
    pub fn occupancy(&self, landing_hold: Timestep) -> impl Iterator<Item = Waypoint> + '_ {
        let arrival = self.arrival();
        let goal = self.goal();
        self.waypoints().chain(
            goal.into_iter()
                .flat_map(move |cell| (1..=landing_hold).map(move |h| Waypoint { cell, time: arrival + h })),
        )
    }

    pub fn distinct_cells(&self) -> BTreeSet<Cell> {
        self.cells.iter().copied().collect()
    }

    /// Checks the structural path invariants against the given endpoints.
    pub fn validate(&self, start: Cell, goal: Cell) -> Result<()> {
        if self.start() != Some(start) {
            return Err(Error::invalid(format!("path does not start at {start}")));
        }
        if self.goal() != Some(goal) {
            return Err(Error::invalid(format!("path does not end at {goal}")));
        }
        for pair in self.cells.windows(2) {
            if pair[0] != pair[1] && !pair[0].is_adjacent(pair[1]) {
                return Err(Error::invalid(format!(
                    "path jumps from {} to {}",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self.cells.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", parts.join(" -> "))
    }
}

/// Serde helper for `BTreeMap<Cell, V>`: JSON object keys must be strings, so
/// cell-keyed maps are written as a list of `[cell, value]` pairs.
pub mod cell_map {
    use super::Cell;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S, V>(map: &BTreeMap<Cell, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<Cell, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let pairs: Vec<(Cell, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: i32, y: i32) -> Cell {
        Cell::new(x, y)
    }

    #[test]
    fn test_position_at_holds_goal() {
        let path = Path::new(vec![c(0, 0), c(1, 0), c(2, 0)]);
        assert_eq!(path.position_at(1, 0), Some(c(1, 0)));
        assert_eq!(path.position_at(3, 0), None);
        assert_eq!(path.position_at(3, 2), Some(c(2, 0)));
        assert_eq!(path.position_at(4, 2), Some(c(2, 0)));
        assert_eq!(path.position_at(5, 2), None);
    }

    #[test]
    fn test_occupancy_includes_hold() {
        let path = Path::new(vec![c(0, 0), c(0, 1)]);
        let occ: Vec<_> = path.occupancy(2).map(|w| (w.cell, w.time)).collect();
        assert_eq!(occ, vec![(c(0, 0), 0), (c(0, 1), 1), (c(0, 1), 2), (c(0, 1), 3)]);
    }

    #[test]
    fn test_validate_rejects_jump() {
        let path = Path::new(vec![c(0, 0), c(2, 0)]);
        assert!(path.validate(c(0, 0), c(2, 0)).is_err());

        let ok = Path::new(vec![c(0, 0), c(0, 0), c(1, 0)]);
        assert!(ok.validate(c(0, 0), c(1, 0)).is_ok());
        assert!(ok.validate(c(0, 0), c(0, 0)).is_err());
    }

    #[test]
    fn test_status_machine() {
        let mut agent = Agent::normal(1, c(0, 0), c(1, 1), 10.0);
        assert!(agent.transition(AgentStatus::Bidding).is_ok());
        assert!(agent.transition(AgentStatus::WinnerCandidate).is_ok());
        assert!(agent.transition(AgentStatus::Bidding).is_ok());
        assert!(agent.transition(AgentStatus::Exited).is_ok());
        assert!(agent.status.is_terminal());
        assert!(agent.transition(AgentStatus::Bidding).is_err());
    }

    #[test]
    fn test_cell_map_round_trips_through_json() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(with = "cell_map")]
            map: std::collections::BTreeMap<Cell, u32>,
        }
        let mut map = std::collections::BTreeMap::new();
        map.insert(c(1, 2), 3);
        let json = serde_json::to_string(&Wrapper { map }).unwrap();
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.map.get(&c(1, 2)), Some(&3));
    }
}
