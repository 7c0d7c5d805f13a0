//! Blocks and block identifiers.

use crate::{PublicKey, Timestamp, Transaction, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte block id (content hash of the serialized block).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(#[serde(with = "crate::hex_serde")] [u8; 32]);

impl BlockId {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl FromStr for BlockId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::hex_serde::parse(s).map(Self)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A block of the delegate-produced chain.
///
/// Signature and id verification happen before a block reaches the consensus
/// core; the id is trusted as given.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub id: BlockId,
    /// `None` only for the genesis block.
    #[serde(default)]
    pub previous_block_id: Option<BlockId>,
    pub timestamp: Timestamp,
    pub generator_public_key: PublicKey,
    #[serde(default)]
    pub reward: u64,
    #[serde(default)]
    pub total_fee: u64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.height == 1 && self.previous_block_id.is_none()
    }

    /// Reward plus fees credited to the generator when the block is applied.
    pub fn generator_income(&self) -> u64 {
        self.reward.saturating_add(self.total_fee)
    }
}
