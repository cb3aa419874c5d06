//! Run parameters and scenario loading
//!
//! Scenarios can be written in Pkl (evaluated through the `pkl` CLI) or as
//! plain JSON. Both end up in the same serde structs.

use crate::airspace::TimeExpandedGrid;
use crate::error::Error;
use crate::market::auction;
use crate::market::pricing::{CongestionPricer, PricingStrategy};
use crate::planning::cbs;
use crate::sampler::{SeededSource, ValueSource};
use crate::types::{Agent, Cell, Priority, Timestep};
use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use tracing::error;

pub fn load_pkl<T: DeserializeOwned>(config_path: impl AsRef<Path>) -> Result<T> {
    let config_path = config_path.as_ref();
    let output = Command::new("pkl")
        .arg("eval")
        .arg("-f")
        .arg("json")
        .arg(config_path)
        .output()
        .context("Failed to execute pkl command")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("pkl failed on {}: {}", config_path.display(), stderr);
        return Err(anyhow!("pkl failed: {}", stderr));
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    let config: T = serde_json::from_str(&json_str).context("Failed to parse config json")?;
    Ok(config)
}

pub fn load_json<T: DeserializeOwned>(config_path: impl AsRef<Path>) -> Result<T> {
    let config_path = config_path.as_ref();
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", config_path.display()))
}

/// Picks the loader from the file extension (`.pkl` or anything else as JSON).
pub fn load<T: DeserializeOwned>(config_path: impl AsRef<Path>) -> Result<T> {
    let config_path = config_path.as_ref();
    match config_path.extension().and_then(|e| e.to_str()) {
        Some("pkl") => load_pkl(config_path),
        _ => load_json(config_path),
    }
}

/// Tunables of one allocation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    pub max_rounds: u32,
    pub max_cbs_nodes: usize,
    pub exit_probability: f64,
    pub base_price: f64,
    pub price_scale: f64,
    pub pricing: PricingStrategy,
    pub congestion_depth: u32,
    pub landing_hold: Timestep,
    /// 0 picks one worker per available core
    pub planning_workers: usize,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            max_cbs_nodes: 1000,
            exit_probability: 0.1,
            base_price: 1.0,
            price_scale: 10.0,
            pricing: PricingStrategy::Linear,
            congestion_depth: 2,
            landing_hold: 0,
            planning_workers: 0,
        }
    }
}

impl RunParams {
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_cbs_nodes(mut self, max_cbs_nodes: usize) -> Self {
        self.max_cbs_nodes = max_cbs_nodes;
        self
    }

    pub fn with_exit_probability(mut self, p: f64) -> Self {
        self.exit_probability = p;
        self
    }

    pub fn with_prices(mut self, base_price: f64, price_scale: f64, pricing: PricingStrategy) -> Self {
        self.base_price = base_price;
        self.price_scale = price_scale;
        self.pricing = pricing;
        self
    }

    pub fn with_landing_hold(mut self, landing_hold: Timestep) -> Self {
        self.landing_hold = landing_hold;
        self
    }

    pub fn with_planning_workers(mut self, workers: usize) -> Self {
        self.planning_workers = workers;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_cbs_nodes == 0 {
            return Err(Error::invalid("max_cbs_nodes must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.exit_probability) {
            return Err(Error::invalid(format!(
                "exit_probability must lie in [0, 1], got {}",
                self.exit_probability
            )));
        }
        self.pricer().map(|_| ())
    }

    pub fn pricer(&self) -> crate::Result<CongestionPricer> {
        CongestionPricer::new(self.base_price, self.price_scale, self.pricing)
    }

    pub fn cbs_config(&self) -> cbs::Config {
        cbs::Config::default()
            .with_max_nodes(self.max_cbs_nodes)
            .with_congestion_depth(self.congestion_depth)
    }

    pub fn auction_config(&self) -> auction::Config {
        auction::Config {
            exit_probability: self.exit_probability,
            planning_workers: self.planning_workers,
        }
    }
}

/// Agent entry of a scenario file; a missing budget is sampled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: u32,
    pub start: (i32, i32),
    pub goal: (i32, i32),
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub budget: Option<f64>,
}

/// Range budgets are drawn from when an agent has none
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetRange {
    pub min: f64,
    pub max: f64,
}

impl Default for BudgetRange {
    fn default() -> Self {
        Self { min: 20.0, max: 60.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub width: i32,
    pub height: i32,
    pub horizon: Timestep,
    pub obstacles: Vec<(i32, i32)>,
    pub agents: Vec<AgentSpec>,
    pub budgets: BudgetRange,
    pub seed: u64,
    pub params: RunParams,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            width: 4,
            height: 4,
            horizon: 50,
            obstacles: Vec::new(),
            agents: Vec::new(),
            budgets: BudgetRange::default(),
            seed: 42,
            params: RunParams::default(),
        }
    }
}

impl ScenarioConfig {
    /// Builds the grid and the agent list. Budgets missing from the file are
    /// drawn in agent order from a source seeded with `seed`.
    pub fn build(&self) -> crate::Result<(TimeExpandedGrid, Vec<Agent>)> {
        if !(self.budgets.min.is_finite() && self.budgets.max.is_finite())
            || self.budgets.min < 0.0
            || self.budgets.max < self.budgets.min
        {
            return Err(Error::ConfigurationError(format!(
                "invalid budget range [{}, {}]",
                self.budgets.min, self.budgets.max
            )));
        }
        let obstacles = self.obstacles.iter().copied().map(Cell::from);
        let grid = TimeExpandedGrid::new(self.width, self.height, self.horizon, obstacles)?;

        let mut source = SeededSource::new(self.seed);
        let agents = self
            .agents
            .iter()
            .map(|spec| {
                let budget = match (spec.priority, spec.budget) {
                    (_, Some(b)) => b,
                    (Priority::Emergency, None) => 0.0,
                    (Priority::Normal, None) => source.uniform(self.budgets.min, self.budgets.max),
                };
                Agent::new(spec.id, spec.start.into(), spec.goal.into(), spec.priority, budget)
            })
            .collect();
        Ok((grid, agents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults_fill_missing_fields() {
        let params: RunParams = serde_json::from_str(r#"{"max_rounds": 9, "pricing": "logarithmic"}"#).unwrap();
        assert_eq!(params.max_rounds, 9);
        assert_eq!(params.pricing, PricingStrategy::Logarithmic);
        assert_eq!(params.max_cbs_nodes, RunParams::default().max_cbs_nodes);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_params_validation() {
        assert!(RunParams::default().with_exit_probability(1.2).validate().is_err());
        assert!(RunParams::default().with_max_cbs_nodes(0).validate().is_err());
        let negative = RunParams::default().with_prices(-1.0, 1.0, PricingStrategy::Linear);
        assert!(matches!(negative.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_scenario_build_samples_missing_budgets() {
        let json = r#"{
            "width": 4, "height": 4, "horizon": 30,
            "obstacles": [[1, 1]],
            "agents": [
                {"id": 1, "start": [0, 0], "goal": [3, 3], "budget": 12.5},
                {"id": 2, "start": [0, 3], "goal": [3, 0]},
                {"id": 3, "start": [3, 1], "goal": [0, 2], "priority": "emergency"}
            ],
            "budgets": {"min": 5.0, "max": 6.0}
        }"#;
        let scenario: ScenarioConfig = serde_json::from_str(json).unwrap();
        let (grid, agents) = scenario.build().unwrap();
        assert!(grid.is_static_obstacle(Cell::new(1, 1)));
        assert_eq!(agents[0].budget, 12.5);
        assert!((5.0..6.0).contains(&agents[1].budget));
        assert!(agents[2].is_emergency());

        let (_, again) = scenario.build().unwrap();
        assert_eq!(agents[1].budget, again[1].budget);
    }

    #[test]
    fn test_scenario_rejects_inverted_budget_range() {
        let scenario = ScenarioConfig {
            budgets: BudgetRange { min: 5.0, max: 1.0 },
            ..Default::default()
        };
        assert!(matches!(scenario.build(), Err(Error::ConfigurationError(_))));
    }
}
