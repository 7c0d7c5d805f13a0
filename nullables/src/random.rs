//! Nullable random: a scripted sequence of unit values.

use dpos_types::RandomSource;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns pre-configured values in order, cycling when exhausted.
#[derive(Debug)]
pub struct NullRandom {
    values: Vec<f64>,
    index: AtomicUsize,
}

impl NullRandom {
    /// Values are clamped into `[0, 1)`.
    pub fn new(values: Vec<f64>) -> Self {
        let values = if values.is_empty() { vec![0.0] } else { values };
        Self {
            values: values
                .into_iter()
                .map(|v| v.clamp(0.0, 1.0 - f64::EPSILON))
                .collect(),
            index: AtomicUsize::new(0),
        }
    }

    /// The same value on every call.
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }

    /// How many values were handed out.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

impl RandomSource for NullRandom {
    fn next_unit(&self) -> f64 {
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        self.values[i % self.values.len()]
    }
}
