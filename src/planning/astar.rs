//! Single-agent A* over `(cell, time)` states

use super::constraints::ConstraintSet;
use crate::airspace::TimeExpandedGrid;
use crate::error::{Error, Result};
use crate::market::pricing::PriceTable;
use crate::types::{AgentId, Cell, Path, Timestep};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

const COST_EPSILON: f64 = 1e-9;

/// How the planner charges for each action.
#[derive(Debug, Clone, Copy, Default)]
pub enum CostMode<'a> {
    /// Every move or wait costs 1.
    #[default]
    Unit,
    /// Entering a cell (waiting in place included) costs that cell's price.
    PriceWeighted(&'a PriceTable),
}

impl<'a> CostMode<'a> {
    /// Price-weighted when a table is given, unit cost otherwise.
    pub fn priced(table: Option<&'a PriceTable>) -> Self {
        table.map_or(CostMode::Unit, CostMode::PriceWeighted)
    }

    fn step_cost(&self, cell: Cell) -> f64 {
        match self {
            CostMode::Unit => 1.0,
            CostMode::PriceWeighted(table) => table.price(cell),
        }
    }

    /// Cheapest possible step, which keeps the Manhattan heuristic admissible.
    fn min_step(&self) -> f64 {
        match self {
            CostMode::Unit => 1.0,
            CostMode::PriceWeighted(table) => table.floor(),
        }
    }
}

/// Inputs of one planner call. The planner itself holds no state.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub agent: AgentId,
    pub start: Cell,
    pub goal: Cell,
    pub grid: &'a TimeExpandedGrid,
    pub constraints: Option<&'a ConstraintSet>,
    pub excluded: Option<&'a HashSet<Cell>>,
    pub cost: CostMode<'a>,
}

impl<'a> PlanRequest<'a> {
    pub fn new(agent: AgentId, start: Cell, goal: Cell, grid: &'a TimeExpandedGrid) -> Self {
        Self {
            agent,
            start,
            goal,
            grid,
            constraints: None,
            excluded: None,
            cost: CostMode::Unit,
        }
    }

    pub fn with_constraints(mut self, constraints: &'a ConstraintSet) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_excluded(mut self, excluded: &'a HashSet<Cell>) -> Self {
        self.excluded = Some(excluded);
        self
    }

    pub fn with_cost(mut self, cost: CostMode<'a>) -> Self {
        self.cost = cost;
        self
    }

    fn forbids_vertex(&self, cell: Cell, time: Timestep) -> bool {
        self.constraints.is_some_and(|c| c.forbids_vertex(cell, time))
    }

    fn forbids_move(&self, from: Cell, to: Cell, time: Timestep) -> bool {
        self.constraints.is_some_and(|c| c.forbids_move(from, to, time))
    }

    fn is_excluded(&self, cell: Cell) -> bool {
        cell != self.start && cell != self.goal && self.excluded.is_some_and(|e| e.contains(&cell))
    }

    /// The goal counts as reached at `time` only if the agent can also sit out
    /// its landing hold there.
    fn goal_holds_from(&self, time: Timestep) -> bool {
        (0..=self.grid.landing_hold()).all(|h| {
            let t = time + h;
            !self.forbids_vertex(self.goal, t) && !self.grid.is_reserved(self.goal, t)
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Frontier {
    f: f64,
    g: f64,
    time: Timestep,
    cell: Cell,
}

impl Ord for Frontier {
    // BinaryHeap is a max-heap: lower f, then earlier time, then lower cell
    // must compare as greater.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.time.cmp(&self.time))
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

/// Finds a minimum-cost path for one agent, or `PlanningFailure` if none
/// exists within the grid horizon.
pub fn plan(req: &PlanRequest<'_>) -> Result<Path> {
    let grid = req.grid;
    for (label, cell) in [("start", req.start), ("goal", req.goal)] {
        if !grid.in_bounds(cell) || grid.is_static_obstacle(cell) {
            return Err(Error::planning(req.agent, format!("{label} {cell} is not free airspace")));
        }
    }
    if grid.is_reserved(req.start, 0) || req.forbids_vertex(req.start, 0) {
        return Err(Error::planning(req.agent, format!("start {} is taken at t=0", req.start)));
    }

    let horizon = grid.horizon();
    let h_scale = req.cost.min_step();
    let heuristic = |cell: Cell| cell.manhattan(req.goal) as f64 * h_scale;

    let mut open = BinaryHeap::new();
    let mut best_g: HashMap<(Cell, Timestep), f64> = HashMap::new();
    let mut parent: HashMap<(Cell, Timestep), Cell> = HashMap::new();

    best_g.insert((req.start, 0), 0.0);
    open.push(Frontier {
        f: heuristic(req.start),
        g: 0.0,
        time: 0,
        cell: req.start,
    });

    while let Some(node) = open.pop() {
        if best_g
            .get(&(node.cell, node.time))
            .is_some_and(|&g| node.g > g + COST_EPSILON)
        {
            continue;
        }

        if node.cell == req.goal && req.goal_holds_from(node.time) {
            return Ok(reconstruct(&parent, node.cell, node.time));
        }

        if node.time >= horizon {
            continue;
        }
        let next_time = node.time + 1;

        let moves = std::iter::once(node.cell).chain(grid.neighbors(node.cell));
        for next in moves {
            if req.is_excluded(next)
                || grid.is_blocked(next, next_time)
                || grid.is_edge_blocked(node.cell, next, next_time)
                || req.forbids_move(node.cell, next, next_time)
            {
                continue;
            }
            let g = node.g + req.cost.step_cost(next);
            let key = (next, next_time);
            if best_g.get(&key).is_some_and(|&old| g >= old - COST_EPSILON) {
                continue;
            }
            best_g.insert(key, g);
            parent.insert(key, node.cell);
            open.push(Frontier {
                f: g + heuristic(next),
                g,
                time: next_time,
                cell: next,
            });
        }
    }

    Err(Error::planning(
        req.agent,
        format!("no route from {} to {} within horizon {horizon}", req.start, req.goal),
    ))
}

fn reconstruct(parent: &HashMap<(Cell, Timestep), Cell>, goal: Cell, arrival: Timestep) -> Path {
    let mut cells = Vec::with_capacity(arrival as usize + 1);
    let mut cell = goal;
    cells.push(cell);
    for t in (1..=arrival).rev() {
        let Some(&prev) = parent.get(&(cell, t)) else {
            break;
        };
        cell = prev;
        cells.push(cell);
    }
    cells.reverse();
    Path::new(cells)
}
