//! Nullable infrastructure for deterministic testing.
//!
//! Every external dependency of the consensus core (clock, randomness, peer
//! network, block storage) sits behind a trait. This crate provides
//! implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Record how they were called, for assertions
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod network;
pub mod random;
pub mod store;

pub use clock::NullClock;
pub use network::NullPeerNetwork;
pub use random::NullRandom;
pub use store::NullBlockStore;
