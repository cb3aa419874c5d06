//! Integration tests for the airspace-alloc library

use airspace_alloc::planning::{PlanRequest, first_conflict, is_conflict_free, plan};
use airspace_alloc::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn c(x: i32, y: i32) -> Cell {
    Cell::new(x, y)
}

fn assert_no_conflicts(result: &AllocationResult, hold: u32) {
    let paths = result.assigned_paths();
    let view: Vec<(AgentId, &Path)> = paths.iter().map(|(id, p)| (*id, *p)).collect();
    assert!(is_conflict_free(&view, hold), "assigned paths collide");
}

fn assert_all_terminal(result: &AllocationResult) {
    for agent in &result.agents {
        assert!(agent.status.is_terminal(), "{} ended {:?}", agent.id, agent.status);
        assert!(result.outcome(agent.id).is_some());
    }
}

/// 5x5 grid whose right half is reachable only through (3, 2), with three
/// agents the same distance away from it.
fn bottleneck() -> (TimeExpandedGrid, Vec<Agent>) {
    bottleneck_with_budget(30.0)
}

fn bottleneck_with_budget(budget: f64) -> (TimeExpandedGrid, Vec<Agent>) {
    let grid = TimeExpandedGrid::new(5, 5, 40, [c(3, 0), c(3, 1), c(3, 3), c(3, 4)]).unwrap();
    let agents = vec![
        Agent::normal(1, c(2, 0), c(4, 1), budget),
        Agent::normal(2, c(0, 2), c(4, 2), budget),
        Agent::normal(3, c(2, 4), c(4, 3), budget),
    ];
    (grid, agents)
}

fn bottleneck_params() -> RunParams {
    RunParams::default()
        .with_max_cbs_nodes(1)
        .with_exit_probability(0.0)
        .with_planning_workers(2)
}

#[test]
fn test_crossing_diagonals_need_no_auction() {
    let grid = TimeExpandedGrid::open(3, 3, 20).unwrap();
    let agents = vec![
        Agent::normal(1, c(0, 0), c(2, 2), 10.0),
        Agent::normal(2, c(2, 0), c(0, 2), 10.0),
    ];
    let result = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(11)).unwrap();

    assert!(result.solved_without_auction());
    assert_eq!(result.count(AgentStatus::Assigned), 2);
    assert_no_conflicts(&result, 0);
    for agent in &agents {
        let path = result.path_of(agent.id).unwrap();
        assert!(path.validate(agent.start, agent.goal).is_ok());
    }
}

#[test]
fn test_single_agent_gets_manhattan_path() {
    let grid = TimeExpandedGrid::open(6, 6, 30).unwrap();
    let agents = vec![Agent::normal(1, c(0, 1), c(5, 4), 10.0)];
    let result = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).unwrap();
    let path = result.path_of(AgentId(1)).unwrap();
    assert_eq!(path.steps() as u32, c(0, 1).manhattan(c(5, 4)));
}

#[test]
fn test_head_on_corridor_never_overlaps() {
    let grid = TimeExpandedGrid::open(3, 1, 12).unwrap();
    let agents = vec![
        Agent::normal(1, c(0, 0), c(2, 0), 10.0),
        Agent::normal(2, c(2, 0), c(0, 0), 10.0),
    ];
    let params = RunParams::default().with_max_cbs_nodes(100);
    let result = allocate(&grid, &agents, &params, &mut SeededSource::new(3)).unwrap();

    assert!(!result.cbs.joint.as_ref().unwrap().solved);
    assert!(!result.solved_without_auction());
    assert_all_terminal(&result);
    assert_no_conflicts(&result, 0);
    assert!(result.count(AgentStatus::Assigned) <= 1);
}

#[test]
fn test_corridor_with_pocket_is_solved_by_cbs() {
    let grid = TimeExpandedGrid::new(3, 2, 20, [c(0, 1), c(2, 1)]).unwrap();
    let agents = vec![
        Agent::normal(1, c(0, 0), c(2, 0), 10.0),
        Agent::normal(2, c(2, 0), c(0, 0), 10.0),
    ];
    let result = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(3)).unwrap();
    assert!(result.solved_without_auction());
    assert_eq!(result.count(AgentStatus::Assigned), 2);
    assert_no_conflicts(&result, 0);
}

#[test]
fn test_emergency_paths_are_untouched() {
    let grid = TimeExpandedGrid::open(5, 5, 30).unwrap();
    let emergency = Agent::emergency(9, c(2, 0), c(2, 4));
    let alone = plan(&PlanRequest::new(emergency.id, emergency.start, emergency.goal, &grid)).unwrap();

    let agents = vec![
        Agent::normal(1, c(0, 2), c(4, 2), 20.0),
        Agent::normal(2, c(4, 1), c(0, 3), 20.0),
        Agent::normal(3, c(1, 1), c(3, 3), 20.0),
        emergency.clone(),
    ];
    let params = RunParams::default().with_max_cbs_nodes(5);
    let result = allocate(&grid, &agents, &params, &mut SeededSource::new(8)).unwrap();

    let outcome = result.outcome(emergency.id).unwrap();
    assert_eq!(outcome.status, AgentStatus::Assigned);
    assert_eq!(outcome.reason, OutcomeReason::Emergency);
    assert_eq!(outcome.path.as_ref(), Some(&alone));

    let reserved: Vec<Cell> = result.grid.reserved_path(emergency.id).into_iter().map(|(_, cell)| cell).collect();
    assert_eq!(reserved, alone.cells().to_vec());
    assert_no_conflicts(&result, 0);
    assert_all_terminal(&result);
}

#[test]
fn test_emergency_path_stays_reserved_through_auction() {
    let (grid, mut agents) = bottleneck();
    // straight down the left edge, clear of the gate
    let emergency = Agent::emergency(9, c(0, 0), c(0, 4));
    let alone = plan(&PlanRequest::new(emergency.id, emergency.start, emergency.goal, &grid)).unwrap();
    agents.push(emergency.clone());

    let result = allocate(&grid, &agents, &bottleneck_params(), &mut SeededSource::new(21)).unwrap();
    assert!(!result.cbs.joint.as_ref().unwrap().solved);
    assert!(!result.rounds.is_empty());

    let outcome = result.outcome(emergency.id).unwrap();
    assert_eq!(outcome.reason, OutcomeReason::Emergency);
    assert_eq!(outcome.path.as_ref(), Some(&alone));

    for round in &result.rounds {
        assert!(round.bids.iter().all(|r| r.bid.agent != emergency.id));
        for bid in round.committed() {
            let pair = [(emergency.id, &alone), (bid.agent, &bid.path)];
            assert_eq!(first_conflict(&pair, 0), None, "round {} committed over {}", round.round, emergency.id);
        }
    }

    let reserved: Vec<Cell> = result.grid.reserved_path(emergency.id).into_iter().map(|(_, cell)| cell).collect();
    assert_eq!(reserved, alone.cells().to_vec());
    assert_no_conflicts(&result, 0);
    assert_all_terminal(&result);
}

#[test]
fn test_bottleneck_commits_one_agent_per_round() {
    let (grid, agents) = bottleneck();
    let result = allocate(&grid, &agents, &bottleneck_params(), &mut SeededSource::new(21)).unwrap();

    assert!(!result.rounds.is_empty());
    for round in &result.rounds {
        let through = round
            .committed()
            .filter(|bid| bid.path.cells().contains(&c(3, 2)))
            .count();
        assert!(through <= 1, "round {} committed {} agents through the bottleneck", round.round, through);
    }
    assert_no_conflicts(&result, 0);
    assert_all_terminal(&result);

    let winner = result.outcome(AgentId(1)).unwrap();
    assert_eq!(winner.reason, OutcomeReason::Auction);
    assert_eq!(winner.round, Some(1));
    for id in [AgentId(2), AgentId(3)] {
        assert_eq!(result.outcome(id).unwrap().status, AgentStatus::Exited);
    }
}

#[test]
fn test_bottleneck_with_tight_budgets_admits_one_winner() {
    let (grid, agents) = bottleneck_with_budget(15.0);
    let result = allocate(&grid, &agents, &bottleneck_params(), &mut SeededSource::new(21)).unwrap();

    assert!(!result.rounds.is_empty());
    assert_no_conflicts(&result, 0);
    assert_all_terminal(&result);

    // every route into the right half crosses the gate, so nobody else fits
    assert_eq!(result.count(AgentStatus::Assigned), 1);
    assert_eq!(result.count(AgentStatus::Exited), 2);
    assert_eq!(result.count(AgentStatus::Unassigned), 0);
    for agent in &agents {
        let outcome = result.outcome(agent.id).unwrap();
        assert_ne!(outcome.reason, OutcomeReason::AuctionExhausted);
        match outcome.status {
            AgentStatus::Assigned => {
                assert_eq!(outcome.reason, OutcomeReason::Auction);
                assert!(outcome.path.as_ref().unwrap().cells().contains(&c(3, 2)));
            }
            AgentStatus::Exited => assert!(outcome.path.is_none()),
            other => panic!("{} ended {:?}", agent.id, other),
        }
    }
}

#[test]
fn test_prices_never_fall_between_rounds() {
    let (grid, agents) = bottleneck();
    let result = allocate(&grid, &agents, &bottleneck_params(), &mut SeededSource::new(21)).unwrap();

    for pair in result.rounds.windows(2) {
        for x in 0..grid.width() {
            for y in 0..grid.height() {
                let cell = c(x, y);
                assert!(pair[1].prices.price(cell) >= pair[0].prices.price(cell));
            }
        }
    }
}

#[test]
fn test_bids_are_self_consistent() {
    let (grid, agents) = bottleneck();
    let result = allocate(&grid, &agents, &bottleneck_params(), &mut SeededSource::new(21)).unwrap();

    let mut seen = 0;
    for round in &result.rounds {
        for record in &round.bids {
            let bid = &record.bid;
            seen += 1;
            assert!(bid.total_cost <= bid.budget);
            let priced: f64 = bid.path.distinct_cells().iter().map(|c| round.prices.price(*c)).sum();
            assert!((priced - bid.total_cost).abs() < 1e-9);
            let sum: f64 = bid.contributions.values().sum();
            assert!((sum - bid.value).abs() < 1e-9);
            if bid.total_cost > 0.0 {
                assert!((bid.value - bid.budget).abs() < 1e-9);
            }
        }
    }
    assert!(seen > 0);
}

#[test]
fn test_same_seed_same_allocation() {
    let (grid, agents) = bottleneck();
    let params = bottleneck_params().with_exit_probability(0.4);
    let a = allocate(&grid, &agents, &params, &mut SeededSource::new(99)).unwrap();
    let b = allocate(&grid, &agents, &params.clone().with_planning_workers(1), &mut SeededSource::new(99)).unwrap();
    assert_eq!(a.outcomes, b.outcomes);
    assert_eq!(a.rounds, b.rounds);
}

#[test]
fn test_landing_hold_delays_followers() {
    let grid = TimeExpandedGrid::open(4, 1, 20).unwrap();
    let agents = vec![
        Agent::normal(1, c(0, 0), c(1, 0), 10.0),
        Agent::normal(2, c(3, 0), c(0, 0), 10.0),
    ];

    let free = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).unwrap();
    assert_eq!(free.path_of(AgentId(2)).unwrap().arrival(), 3);

    let params = RunParams::default().with_landing_hold(2);
    let held = allocate(&grid, &agents, &params, &mut SeededSource::new(1)).unwrap();
    assert!(held.solved_without_auction());
    assert_eq!(held.path_of(AgentId(2)).unwrap().arrival(), 5);
    assert_no_conflicts(&held, 2);
}

#[test]
fn test_random_scenarios_terminate() {
    let mut rng = StdRng::seed_from_u64(2024);
    for seed in 0..12u64 {
        let mut cells: Vec<Cell> = (0..6).flat_map(|x| (0..6).map(move |y| c(x, y))).collect();
        cells.shuffle(&mut rng);
        let obstacles: Vec<Cell> = cells.drain(..5).collect();
        let grid = TimeExpandedGrid::new(6, 6, 40, obstacles).unwrap();

        let agents: Vec<Agent> = (0..6u32)
            .map(|i| {
                let start = cells[2 * i as usize];
                let goal = cells[2 * i as usize + 1];
                if i == 0 && seed % 3 == 0 {
                    Agent::emergency(i, start, goal)
                } else {
                    Agent::normal(i, start, goal, rng.random_range(5.0..40.0))
                }
            })
            .collect();

        let params = RunParams::default()
            .with_max_rounds(4)
            .with_max_cbs_nodes(20)
            .with_exit_probability(0.2)
            .with_prices(1.0, 3.0, if seed % 2 == 0 { PricingStrategy::Linear } else { PricingStrategy::Logarithmic });
        let result = allocate(&grid, &agents, &params, &mut SeededSource::new(seed)).unwrap();

        assert!(result.rounds.len() <= 4);
        assert_all_terminal(&result);
        assert_no_conflicts(&result, 0);
        for (id, path) in result.assigned_paths() {
            let agent = agents.iter().find(|a| a.id == id).unwrap();
            assert!(path.validate(agent.start, agent.goal).is_ok());
            assert!(path.cells().iter().all(|cell| !grid.is_static_obstacle(*cell)));
        }
    }
}

#[test]
fn test_invalid_input_aborts() {
    let grid = TimeExpandedGrid::open(3, 3, 10).unwrap();
    let agents = vec![Agent::normal(1, c(0, 0), c(5, 5), 10.0)];
    let err = allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let agents = vec![Agent::normal(1, c(0, 0), c(2, 2), f64::NAN)];
    assert!(allocate(&grid, &agents, &RunParams::default(), &mut SeededSource::new(1)).is_err());
}
