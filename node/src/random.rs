use dpos_types::RandomSource;
use rand::Rng;

/// [`RandomSource`] backed by the thread-local generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_unit_interval() {
        let random = ThreadRandom;
        for _ in 0..1000 {
            let v = random.next_unit();
            assert!((0.0..1.0).contains(&v));
        }
    }
}
