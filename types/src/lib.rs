//! Fundamental types for the DPoS consensus core.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! blocks and block ids, delegate keys, addresses, timestamps and slots, the
//! milestone schedule, the transactions a block carries, and the clock and
//! randomness seams.

pub mod address;
pub mod block;
pub mod error;
pub mod keys;
pub mod milestone;
pub mod random;
pub mod time;
pub mod transaction;

mod hex_serde;

pub use address::Address;
pub use block::{Block, BlockId};
pub use error::TypesError;
pub use keys::PublicKey;
pub use milestone::{Milestone, MilestoneSchedule};
pub use random::RandomSource;
pub use time::{Clock, SystemClock, Timestamp};
pub use transaction::{Transaction, TransactionKind};
