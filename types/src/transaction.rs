//! Transactions carried by blocks, reduced to their wallet effects.

use crate::{Address, PublicKey};
use serde::{Deserialize, Serialize};

/// A transaction already verified by the transaction layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub sender_public_key: PublicKey,
    pub fee: u64,
    pub kind: TransactionKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer { recipient: Address, amount: u64 },
    DelegateRegistration { username: String },
    DelegateResignation,
    Vote { delegate: PublicKey },
    Unvote { delegate: PublicKey },
    /// Moves `amount` from the sender's balance into its locked balance.
    HtlcLock { amount: u64 },
}

impl Transaction {
    /// Amount leaving the sender's spendable balance, fee included.
    pub fn total_debit(&self) -> u64 {
        let amount = match &self.kind {
            TransactionKind::Transfer { amount, .. } | TransactionKind::HtlcLock { amount } => {
                *amount
            }
            _ => 0,
        };
        amount.saturating_add(self.fee)
    }
}
