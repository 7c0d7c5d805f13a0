//! Wallets and their delegate attributes.

use dpos_types::{Address, BlockId, PublicKey};
use serde::{Deserialize, Serialize};

/// Attributes present only on wallets that registered as delegates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegateAttributes {
    pub username: String,
    /// Sum of `balance + htlc_locked_balance` over every voter.
    pub vote_balance: u64,
    /// 1-based position from the latest ranking.
    pub rank: Option<u32>,
    /// Round for which the delegate was last selected as active.
    pub round: Option<u64>,
    pub resigned: bool,
    pub produced_blocks: u64,
    pub forged_rewards: u64,
    pub forged_fees: u64,
    pub last_block: Option<BlockId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: Address,
    pub public_key: Option<PublicKey>,
    #[serde(default)]
    pub balance: u64,
    /// The delegate this wallet votes for.
    pub vote: Option<PublicKey>,
    #[serde(default)]
    pub htlc_locked_balance: u64,
    pub delegate: Option<DelegateAttributes>,
}

impl Wallet {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            public_key: None,
            balance: 0,
            vote: None,
            htlc_locked_balance: 0,
            delegate: None,
        }
    }

    pub fn is_delegate(&self) -> bool {
        self.delegate.is_some()
    }

    pub fn is_resigned(&self) -> bool {
        self.delegate.as_ref().is_some_and(|d| d.resigned)
    }

    pub fn has_voted(&self) -> bool {
        self.vote.is_some()
    }

    /// Weight this wallet adds to the delegate it votes for.
    pub fn voting_weight(&self) -> u64 {
        self.balance.saturating_add(self.htlc_locked_balance)
    }

    pub fn username(&self) -> Option<&str> {
        self.delegate.as_ref().map(|d| d.username.as_str())
    }
}
