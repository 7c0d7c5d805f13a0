//! Consensus core: the deterministic rules every node must agree on.
//!
//! - [`chain_validator`]: whether a block legally extends its predecessor.
//! - [`round_calculator`]: height to round mapping over the milestone schedule.
//! - [`delegate_ranking`]: active delegate selection and vote balance rebuild.
//! - [`forging`]: per-round forging order and expected generator.
//! - [`error`]: consensus error types.

pub mod chain_validator;
pub mod delegate_ranking;
pub mod error;
pub mod forging;
pub mod round_calculator;

pub use chain_validator::{ChainBreak, ChainValidator};
pub use delegate_ranking::{build_delegate_ranking, build_vote_balances, RankedDelegate};
pub use error::{ConsensusError, RoundError};
pub use forging::{expected_generator, shuffle_delegates};
pub use round_calculator::{RoundCalculator, RoundInfo};
