//! Delegate ranking and vote balance accumulation.
//!
//! Both operations read and annotate wallets held by the
//! [`WalletRepository`]; neither owns wallet storage.

use crate::{ConsensusError, RoundInfo};
use dpos_state::{StateError, WalletRepository};
use dpos_types::PublicKey;
use std::cmp::Reverse;

/// A delegate's position in a ranking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedDelegate {
    pub public_key: PublicKey,
    pub username: String,
    pub vote_balance: u64,
    /// 1-based.
    pub rank: u32,
    /// Set only when the ranking was built for a round.
    pub round: Option<u64>,
}

/// Rank every eligible delegate by vote balance, public key breaking ties.
///
/// Each eligible delegate wallet gets its `rank` stamped. With `round_info`
/// the result is cut to the active set and each member is stamped with the
/// round; fewer eligible delegates than `max_delegates` is an error.
pub fn build_delegate_ranking(
    wallets: &mut WalletRepository,
    round_info: Option<&RoundInfo>,
) -> Result<Vec<RankedDelegate>, ConsensusError> {
    let mut delegates: Vec<RankedDelegate> = wallets
        .all_by_username()
        .filter(|w| !w.is_resigned())
        .filter_map(|w| {
            let attrs = w.delegate.as_ref()?;
            let Some(public_key) = w.public_key else {
                tracing::warn!(
                    username = %attrs.username,
                    "delegate without a public key skipped"
                );
                return None;
            };
            Some(RankedDelegate {
                public_key,
                username: attrs.username.clone(),
                vote_balance: attrs.vote_balance,
                rank: 0,
                round: None,
            })
        })
        .collect();

    delegates.sort_by_key(|d| (Reverse(d.vote_balance), d.public_key));

    if let Some(pair) = delegates
        .windows(2)
        .find(|p| p[0].vote_balance == p[1].vote_balance && p[0].public_key == p[1].public_key)
    {
        return Err(ConsensusError::DuplicateDelegate {
            public_key: pair[0].public_key.to_hex(),
            vote_balance: pair[0].vote_balance,
        });
    }

    for (index, delegate) in delegates.iter_mut().enumerate() {
        delegate.rank = index as u32 + 1;
        wallets.delegate_mut(&delegate.public_key)?.rank = Some(delegate.rank);
    }

    let Some(info) = round_info else {
        return Ok(delegates);
    };

    let available = delegates.len() as u64;
    if available < info.max_delegates {
        return Err(ConsensusError::InsufficientDelegates {
            required: info.max_delegates,
            available,
        });
    }
    delegates.truncate(info.max_delegates as usize);

    for pair in delegates.windows(2) {
        if pair[0].vote_balance == pair[1].vote_balance {
            tracing::warn!(
                round = info.round,
                first = %pair[0].username,
                second = %pair[1].username,
                vote_balance = %pair[0].vote_balance,
                "active delegates tied on vote balance, ordered by public key"
            );
        }
    }

    for delegate in delegates.iter_mut() {
        delegate.round = Some(info.round);
        wallets.delegate_mut(&delegate.public_key)?.round = Some(info.round);
    }

    tracing::debug!(
        round = info.round,
        active = delegates.len(),
        "active delegates ranked"
    );
    Ok(delegates)
}

/// Recompute every delegate's vote balance from scratch.
///
/// A voter contributes its spendable balance plus its HTLC-locked balance.
pub fn build_vote_balances(wallets: &mut WalletRepository) -> Result<(), ConsensusError> {
    for wallet in wallets.all_mut() {
        if let Some(attrs) = wallet.delegate.as_mut() {
            attrs.vote_balance = 0;
        }
    }

    let votes: Vec<(String, PublicKey, u64)> = wallets
        .all()
        .filter_map(|w| w.vote.map(|d| (w.address.to_string(), d, w.voting_weight())))
        .collect();

    for (voter, delegate, weight) in votes {
        let attrs = wallets.delegate_mut(&delegate).map_err(|e| match e {
            StateError::UnknownWallet(_) | StateError::NotADelegate(_) => {
                ConsensusError::UnknownVoteTarget {
                    voter: voter.clone(),
                    delegate: delegate.to_hex(),
                }
            }
            other => ConsensusError::State(other),
        })?;
        attrs.vote_balance = attrs.vote_balance.saturating_add(weight);
    }
    Ok(())
}
