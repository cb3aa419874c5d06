use crate::allocator::{AgentOutcome, RoundRecord};
use crate::types::AgentId;
use std::collections::BTreeMap;

#[macro_export]
macro_rules! auction_info {
    ($($arg:tt)+) => {
        tracing::info!(target: "auction", $($arg)+)
    }
}

#[macro_export]
macro_rules! auction_debug {
    ($($arg:tt)+) => {
        tracing::debug!(target: "auction", $($arg)+)
    }
}

/// Log what happened in one auction round
pub fn log_round_summary(record: &RoundRecord) {
    let committed = record.committed().count();
    auction_info!(
        "Round {}: {} bids, {} committed, {} exits, {} still bidding",
        record.round,
        record.bids.len(),
        committed,
        record.exits.len(),
        record.active_after
    );

    let mut hottest: Vec<_> = record.prices.iter().collect();
    hottest.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let hot_str = hottest
        .iter()
        .take(5)
        .map(|(cell, price)| format!("{}={:.2}", cell, price))
        .collect::<Vec<_>>()
        .join(", ");
    auction_debug!("  base price {:.2}, hottest cells: [{}]", record.prices.base(), hot_str);

    for entry in &record.bids {
        auction_debug!(
            "  {} value {:.2} cost {:.2} budget {:.2} -> {:?}",
            entry.bid.agent,
            entry.bid.value,
            entry.bid.total_cost,
            entry.bid.budget,
            entry.outcome
        );
    }
    for exit in &record.exits {
        auction_debug!("  {} exited after {} attempts: {:?}", exit.agent, exit.attempts, exit.reason);
    }
}

/// Log the final outcome of every agent
pub fn log_outcome_table(outcomes: &BTreeMap<AgentId, AgentOutcome>) {
    auction_info!("Final allocation table:");
    for (id, outcome) in outcomes {
        match (&outcome.path, outcome.round) {
            (Some(path), Some(round)) => {
                auction_info!("{}: {:?} via {} in round {}, arrives t={}", id, outcome.status, outcome.reason, round, path.arrival())
            }
            (Some(path), None) => {
                auction_info!("{}: {:?} via {}, arrives t={}", id, outcome.status, outcome.reason, path.arrival())
            }
            (None, _) => auction_info!("{}: {:?} ({})", id, outcome.status, outcome.reason),
        }
    }
}
