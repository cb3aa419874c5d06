//! Time-expanded grid with permanent reservations

use crate::error::{Error, Result};
use crate::types::{AgentId, Cell, Path, Timestep};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Static obstacles plus the `(cell, time)` reservations of committed paths.
///
/// Reservations are cumulative and never released within a run. Both stores
/// sit behind `Arc`, so cloning the grid is a cheap immutable snapshot:
/// [`TimeExpandedGrid::commit`] copies the reservation map only if a snapshot
/// is still alive.
#[derive(Debug, Clone)]
pub struct TimeExpandedGrid {
    width: i32,
    height: i32,
    horizon: Timestep,
    landing_hold: Timestep,
    static_obstacles: Arc<HashSet<Cell>>,
    reservations: Arc<HashMap<(Cell, Timestep), AgentId>>,
}

impl TimeExpandedGrid {
    pub fn new(
        width: i32,
        height: i32,
        horizon: Timestep,
        static_obstacles: impl IntoIterator<Item = Cell>,
    ) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::invalid(format!(
                "grid dimensions must be positive, got {width}x{height}"
            )));
        }
        if horizon == 0 {
            return Err(Error::invalid("planning horizon must be positive"));
        }
        let mut obstacles = HashSet::new();
        for cell in static_obstacles {
            if !(0..width).contains(&cell.x) || !(0..height).contains(&cell.y) {
                return Err(Error::invalid(format!("static obstacle {cell} is out of bounds")));
            }
            obstacles.insert(cell);
        }
        Ok(Self {
            width,
            height,
            horizon,
            landing_hold: 0,
            static_obstacles: Arc::new(obstacles),
            reservations: Arc::new(HashMap::new()),
        })
    }

    /// Obstacle-free grid.
    pub fn open(width: i32, height: i32, horizon: Timestep) -> Result<Self> {
        Self::new(width, height, horizon, std::iter::empty())
    }

    /// Sets how long committed agents keep their goal reserved after arrival.
    pub fn with_landing_hold(mut self, landing_hold: Timestep) -> Self {
        self.landing_hold = landing_hold;
        self
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn horizon(&self) -> Timestep {
        self.horizon
    }

    pub fn landing_hold(&self) -> Timestep {
        self.landing_hold
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        (0..self.width).contains(&cell.x) && (0..self.height).contains(&cell.y)
    }

    pub fn is_static_obstacle(&self, cell: Cell) -> bool {
        self.static_obstacles.contains(&cell)
    }

    pub fn static_obstacles(&self) -> impl Iterator<Item = &Cell> {
        self.static_obstacles.iter()
    }

    /// In-bounds, obstacle-free orthogonal neighbours, in a fixed order.
    pub fn neighbors(&self, cell: Cell) -> impl Iterator<Item = Cell> + '_ {
        cell.adjacent()
            .into_iter()
            .filter(|n| self.in_bounds(*n) && !self.is_static_obstacle(*n))
    }

    pub fn owner(&self, cell: Cell, time: Timestep) -> Option<AgentId> {
        self.reservations.get(&(cell, time)).copied()
    }

    pub fn is_reserved(&self, cell: Cell, time: Timestep) -> bool {
        self.reservations.contains_key(&(cell, time))
    }

    pub fn is_blocked(&self, cell: Cell, time: Timestep) -> bool {
        !self.in_bounds(cell) || self.is_static_obstacle(cell) || self.is_reserved(cell, time)
    }

    /// True when moving `from -> to` arriving at `time` would swap places with
    /// a committed agent moving `to -> from` over the same step.
    pub fn is_edge_blocked(&self, from: Cell, to: Cell, time: Timestep) -> bool {
        if from == to || time == 0 {
            return false;
        }
        match (self.owner(to, time - 1), self.owner(from, time)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// Cells reserved by `agent`, ordered by time.
    pub fn reserved_path(&self, agent: AgentId) -> Vec<(Timestep, Cell)> {
        let mut cells: Vec<_> = self
            .reservations
            .iter()
            .filter(|(_, owner)| **owner == agent)
            .map(|((cell, time), _)| (*time, *cell))
            .collect();
        cells.sort();
        cells
    }

    /// First waypoint of `path` (landing hold included) that would hit a static
    /// obstacle, another agent's reservation, or a swap with a committed agent.
    pub fn first_conflict(&self, path: &Path, agent: AgentId) -> Option<(Cell, Timestep)> {
        let mut prev: Option<Cell> = None;
        for wp in path.occupancy(self.landing_hold) {
            if !self.in_bounds(wp.cell) || self.is_static_obstacle(wp.cell) {
                return Some((wp.cell, wp.time));
            }
            if let Some(owner) = self.owner(wp.cell, wp.time)
                && owner != agent
            {
                return Some((wp.cell, wp.time));
            }
            if let Some(from) = prev
                && self.is_edge_blocked(from, wp.cell, wp.time)
            {
                return Some((wp.cell, wp.time));
            }
            prev = Some(wp.cell);
        }
        None
    }

    /// Reserves every `(cell, time)` of `path` for `agent`.
    ///
    /// The caller is expected to pre-check with [`Self::first_conflict`]; on
    /// any collision this returns `ReservationConflict` and leaves the grid
    /// untouched.
    pub fn commit(&mut self, agent: AgentId, path: &Path) -> Result<()> {
        self.try_commit(agent, path)
            .map_err(|(cell, time)| Error::ReservationConflict { agent, cell, time })
    }

    /// Same as [`Self::commit`], handing back the blocked waypoint on failure.
    pub fn try_commit(&mut self, agent: AgentId, path: &Path) -> std::result::Result<(), (Cell, Timestep)> {
        if let Some(blocked) = self.first_conflict(path, agent) {
            return Err(blocked);
        }
        let hold = self.landing_hold;
        let reservations = Arc::make_mut(&mut self.reservations);
        for wp in path.occupancy(hold) {
            reservations.insert((wp.cell, wp.time), agent);
        }
        Ok(())
    }
}
