use crate::allocator::{AllocationResult, CbsSummary, OutcomeReason};
use crate::types::{AgentStatus, Cell, Priority};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub agent_id: u32,
    pub priority: Priority,
    pub status: AgentStatus,
    pub reason: OutcomeReason,
    pub round: Option<u32>,
    pub arrival: Option<u32>,
    pub path: Vec<Cell>,
}

#[derive(Debug, Serialize)]
pub struct BidSummary {
    pub agent_id: u32,
    pub value: f64,
    pub total_cost: f64,
    pub budget: f64,
    pub committed: bool,
}

#[derive(Debug, Serialize)]
pub struct RoundSummary {
    pub round: u32,
    pub base_price: f64,
    pub max_price: f64,
    pub priced_cells: usize,
    pub congestion_total: u64,
    pub bids: Vec<BidSummary>,
    pub exits: Vec<u32>,
    pub active_after: usize,
}

#[derive(Debug, Serialize)]
pub struct AllocationReport {
    pub agents: Vec<AgentSummary>,
    pub rounds: Vec<RoundSummary>,
    pub cbs: CbsSummary,
    pub status_counts: BTreeMap<String, usize>,
    pub reservations: usize,
    pub total_duration_ms: f64,
    pub agent_count: usize,
}

pub fn build_report(result: &AllocationResult, run_start: Instant) -> AllocationReport {
    let agents = result
        .outcomes
        .values()
        .map(|o| AgentSummary {
            agent_id: o.agent.0,
            priority: o.priority,
            status: o.status,
            reason: o.reason,
            round: o.round,
            arrival: o.path.as_ref().map(|p| p.arrival()),
            path: o.path.as_ref().map(|p| p.cells().to_vec()).unwrap_or_default(),
        })
        .collect();

    let rounds = result
        .rounds
        .iter()
        .map(|r| RoundSummary {
            round: r.round,
            base_price: r.prices.base(),
            max_price: r.prices.iter().map(|(_, p)| p).fold(r.prices.base(), f64::max),
            priced_cells: r.prices.len(),
            congestion_total: r.heatmap.total(),
            bids: r
                .bids
                .iter()
                .map(|b| BidSummary {
                    agent_id: b.bid.agent.0,
                    value: b.bid.value,
                    total_cost: b.bid.total_cost,
                    budget: b.bid.budget,
                    committed: b.outcome.is_committed(),
                })
                .collect(),
            exits: r.exits.iter().map(|e| e.agent.0).collect(),
            active_after: r.active_after,
        })
        .collect();

    let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
    for agent in &result.agents {
        *status_counts.entry(format!("{:?}", agent.status).to_lowercase()).or_default() += 1;
    }

    AllocationReport {
        agents,
        rounds,
        cbs: result.cbs.clone(),
        status_counts,
        reservations: result.grid.reservation_count(),
        total_duration_ms: run_start.elapsed().as_secs_f64() * 1000.0,
        agent_count: result.agents.len(),
    }
}

pub fn write_report_json<P: AsRef<Path>>(
    report: &AllocationReport,
    result_dir: P,
) -> std::io::Result<PathBuf> {
    let summary_path = result_dir.as_ref().join("summary.json");
    let mut summary_file = File::create(&summary_path)?;
    serde_json::to_writer_pretty(&mut summary_file, report)?;
    Ok(summary_path)
}
