//! Randomness as an injectable dependency.

/// Uniform random numbers in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_unit(&self) -> f64;
}
