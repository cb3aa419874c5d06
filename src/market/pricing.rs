//! Congestion heatmaps and the per-cell price tables derived from them

use crate::error::{Error, Result};
use crate::types::{Cell, Path, cell_map};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-cell congestion counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heatmap {
    #[serde(with = "cell_map")]
    counts: BTreeMap<Cell, u32>,
}

impl Heatmap {
    pub fn bump(&mut self, cell: Cell, by: u32) {
        if by > 0 {
            *self.counts.entry(cell).or_default() += by;
        }
    }

    pub fn count(&self, cell: Cell) -> u32 {
        self.counts.get(&cell).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Cell, u32)> + '_ {
        self.counts.iter().map(|(c, n)| (*c, *n))
    }

    pub fn total(&self) -> u64 {
        self.counts.values().map(|&n| n as u64).sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Overlap counts of independently planned paths: for every cell visited
    /// by at least two paths, the number of distinct paths visiting it.
    pub fn from_overlap<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Self {
        let mut visits: BTreeMap<Cell, u32> = BTreeMap::new();
        for path in paths {
            for cell in path.distinct_cells() {
                *visits.entry(cell).or_default() += 1;
            }
        }
        visits.retain(|_, n| *n >= 2);
        Self { counts: visits }
    }
}

/// How a congestion count is turned into a price increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PricingStrategy {
    /// `base + scale * count`
    #[default]
    Linear,
    /// `base + scale * ln(1 + count)`
    Logarithmic,
}

impl PricingStrategy {
    fn weight(&self, count: u32) -> f64 {
        match self {
            PricingStrategy::Linear => count as f64,
            PricingStrategy::Logarithmic => (count as f64).ln_1p(),
        }
    }
}

/// Read-only price of every cell for one auction round. Cells without an
/// entry cost `base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    base: f64,
    #[serde(with = "cell_map")]
    prices: BTreeMap<Cell, f64>,
}

impl PriceTable {
    pub fn uniform(base: f64) -> Self {
        Self {
            base,
            prices: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, cell: Cell, price: f64) {
        self.prices.insert(cell, price);
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn price(&self, cell: Cell) -> f64 {
        self.prices.get(&cell).copied().unwrap_or(self.base)
    }

    /// Lowest price of any cell.
    pub fn floor(&self) -> f64 {
        self.prices.values().copied().fold(self.base, f64::min)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Cell, f64)> + '_ {
        self.prices.iter().map(|(c, p)| (*c, *p))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Sum of prices over the distinct cells of `cells`; waiting in a cell
    /// does not charge it twice.
    pub fn cost_of(&self, cells: &BTreeSet<Cell>) -> f64 {
        cells.iter().map(|c| self.price(*c)).sum()
    }

    pub fn path_cost(&self, path: &Path) -> f64 {
        self.cost_of(&path.distinct_cells())
    }
}

/// Maps congestion counts to starting prices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionPricer {
    pub base: f64,
    pub scale: f64,
    pub strategy: PricingStrategy,
}

impl CongestionPricer {
    pub fn new(base: f64, scale: f64, strategy: PricingStrategy) -> Result<Self> {
        for (name, v) in [("base price", base), ("price scale", scale)] {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::invalid(format!("{name} must be finite and non-negative, got {v}")));
            }
        }
        Ok(Self { base, scale, strategy })
    }

    pub fn price(&self, count: u32) -> f64 {
        self.base + self.scale * self.strategy.weight(count)
    }

    pub fn price_table(&self, heatmap: &Heatmap) -> PriceTable {
        let mut table = PriceTable::uniform(self.base);
        for (cell, count) in heatmap.iter() {
            table.set(cell, self.price(count));
        }
        table
    }
}
