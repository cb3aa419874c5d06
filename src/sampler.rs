//! Injectable randomness for exit draws and budget sampling
//!
//! Nothing in the allocator touches ambient randomness; every draw goes
//! through a [`ValueSource`] so a run is reproducible from its seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait ValueSource: Send {
    /// Uniform draw in `[0, 1)`.
    fn next_unit(&mut self) -> f64;

    /// Derives an independent child stream. The parent advances, so the
    /// sequence of children is itself reproducible.
    fn split(&mut self) -> Self
    where
        Self: Sized;

    /// True with probability `p`.
    fn chance(&mut self, p: f64) -> bool {
        self.next_unit() < p
    }

    /// Uniform draw in `[lo, hi)`, or `lo` when the range is empty.
    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            lo
        } else {
            lo + (hi - lo) * self.next_unit()
        }
    }
}

/// `StdRng`-backed source seeded from a `u64`
#[derive(Debug, Clone)]
pub struct SeededSource {
    rng: StdRng,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ValueSource for SeededSource {
    fn next_unit(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    fn split(&mut self) -> Self {
        Self::new(self.rng.random())
    }
}

/// Replays a fixed cycle of values; every child replays the same cycle.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    values: Vec<f64>,
    cursor: usize,
}

impl ScriptedSource {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, cursor: 0 }
    }

    /// A source whose every draw is `value`.
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl ValueSource for ScriptedSource {
    fn next_unit(&mut self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let v = self.values[self.cursor % self.values.len()];
        self.cursor += 1;
        v
    }

    fn split(&mut self) -> Self {
        Self::new(self.values.clone())
    }
}
