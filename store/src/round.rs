//! Persisted round records.

use dpos_types::PublicKey;
use serde::{Deserialize, Serialize};

/// One delegate of a saved round, in rank order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDelegate {
    pub public_key: PublicKey,
    pub vote_balance: u64,
    pub rank: u32,
}

/// The active delegates of a round, sorted by rank (not by forging order).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRound {
    pub round: u64,
    pub delegates: Vec<RoundDelegate>,
}
