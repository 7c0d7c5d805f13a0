//! Round bookkeeping: persisting each round's active set and keeping the
//! current forging order.

use std::sync::Arc;

use dpos_consensus::{
    build_delegate_ranking, shuffle_delegates, RankedDelegate, RoundCalculator, RoundInfo,
};
use dpos_state::WalletRepository;
use dpos_store::{BlockStore, RoundDelegate, SavedRound};
use dpos_types::PublicKey;

use crate::NodeError;

/// The round being forged and its forging order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveRound {
    pub round: u64,
    pub forging_order: Vec<PublicKey>,
}

pub struct RoundManager {
    calculator: RoundCalculator,
    store: Arc<dyn BlockStore>,
    current: Option<ActiveRound>,
}

impl RoundManager {
    pub fn new(calculator: RoundCalculator, store: Arc<dyn BlockStore>) -> Self {
        Self {
            calculator,
            store,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&ActiveRound> {
        self.current.as_ref()
    }

    /// Forging order of the current round; empty before bootstrap.
    pub fn forging_order(&self) -> &[PublicKey] {
        self.current
            .as_ref()
            .map_or(&[][..], |r| r.forging_order.as_slice())
    }

    /// Called after block `height` was applied. Opens the next round when
    /// `height` closed the current one.
    pub fn apply_round(
        &mut self,
        height: u64,
        wallets: &mut WalletRepository,
    ) -> Result<(), NodeError> {
        let next = height + 1;
        if !self.calculator.is_new_round(next) {
            return Ok(());
        }
        let info = self.calculator.calculate_round(next)?;
        let active = build_delegate_ranking(wallets, Some(&info))?;
        self.store.save_round(&saved_round(&info, &active))?;
        self.activate(info.round, &active);
        tracing::info!(
            round = info.round,
            height = next,
            delegates = active.len(),
            "starting new round"
        );
        Ok(())
    }

    /// Called after block `height` was reverted. Drops the round that block
    /// opened and goes back to the one before it.
    pub fn revert_round(
        &mut self,
        height: u64,
        wallets: &mut WalletRepository,
    ) -> Result<(), NodeError> {
        let next = height + 1;
        if !self.calculator.is_new_round(next) {
            return Ok(());
        }
        let info = self.calculator.calculate_round(next)?;
        self.store.delete_round(info.round)?;
        tracing::info!(round = info.round, height, "round reverted");

        if height == 0 {
            self.current = None;
            return Ok(());
        }
        let previous = self.calculator.calculate_round(height)?;
        self.load_or_build(&previous, wallets)
    }

    /// Make the round containing `last_height + 1` current, building and
    /// saving it if the store does not have it.
    pub fn restore_current_round(
        &mut self,
        last_height: u64,
        wallets: &mut WalletRepository,
    ) -> Result<(), NodeError> {
        let info = self.calculator.calculate_round(last_height + 1)?;
        self.load_or_build(&info, wallets)
    }

    /// Delete every saved round after the one containing `last_height + 1`.
    pub fn delete_future_rounds(&self, last_height: u64) -> Result<(), NodeError> {
        let info = self.calculator.calculate_round(last_height + 1)?;
        self.store.delete_rounds_from(info.round + 1)?;
        Ok(())
    }

    fn load_or_build(
        &mut self,
        info: &RoundInfo,
        wallets: &mut WalletRepository,
    ) -> Result<(), NodeError> {
        if let Some(saved) = self.store.round(info.round)? {
            let mut order: Vec<PublicKey> =
                saved.delegates.iter().map(|d| d.public_key).collect();
            shuffle_delegates(info.round, &mut order);
            self.current = Some(ActiveRound {
                round: info.round,
                forging_order: order,
            });
            return Ok(());
        }

        tracing::warn!(round = info.round, "round not saved, rebuilding from wallets");
        let active = build_delegate_ranking(wallets, Some(info))?;
        self.store.save_round(&saved_round(info, &active))?;
        self.activate(info.round, &active);
        Ok(())
    }

    fn activate(&mut self, round: u64, active: &[RankedDelegate]) {
        let mut order: Vec<PublicKey> = active.iter().map(|d| d.public_key).collect();
        shuffle_delegates(round, &mut order);
        self.current = Some(ActiveRound {
            round,
            forging_order: order,
        });
    }
}

fn saved_round(info: &RoundInfo, active: &[RankedDelegate]) -> SavedRound {
    SavedRound {
        round: info.round,
        delegates: active
            .iter()
            .map(|d| RoundDelegate {
                public_key: d.public_key,
                vote_balance: d.vote_balance,
                rank: d.rank,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpos_state::{DelegateAttributes, Wallet};
    use dpos_store::MemoryBlockStore;
    use dpos_types::{Address, Milestone, MilestoneSchedule};

    fn wallets(count: u8) -> WalletRepository {
        let mut repo = WalletRepository::new();
        for n in 1..=count {
            let mut w = Wallet::new(Address::new(format!("d{n}")));
            w.public_key = Some(PublicKey::new([n; 32]));
            w.delegate = Some(DelegateAttributes {
                username: format!("delegate{n}"),
                vote_balance: u64::from(n) * 100,
                ..DelegateAttributes::default()
            });
            repo.index(w);
        }
        repo
    }

    fn manager(active: u64) -> (RoundManager, Arc<MemoryBlockStore>) {
        let schedule = MilestoneSchedule::new(vec![Milestone {
            height: 1,
            active_delegates: active,
            blocktime: 8,
            reward: 0,
        }])
        .unwrap();
        let store = Arc::new(MemoryBlockStore::new());
        let manager = RoundManager::new(RoundCalculator::new(schedule), store.clone());
        (manager, store)
    }

    #[test]
    fn restore_builds_and_saves_the_first_round() {
        let (mut rounds, store) = manager(3);
        let mut repo = wallets(4);

        rounds.restore_current_round(1, &mut repo).unwrap();
        let current = rounds.current().unwrap();
        assert_eq!(current.round, 1);
        assert_eq!(current.forging_order.len(), 3);

        let saved = store.round(1).unwrap().expect("round saved");
        let ranked: Vec<u8> = saved.delegates.iter().map(|d| d.public_key.as_bytes()[0]).collect();
        assert_eq!(ranked, vec![4, 3, 2]);
    }

    #[test]
    fn closing_a_round_opens_the_next() {
        let (mut rounds, store) = manager(3);
        let mut repo = wallets(3);
        rounds.restore_current_round(1, &mut repo).unwrap();

        rounds.apply_round(2, &mut repo).unwrap();
        assert_eq!(rounds.current().unwrap().round, 1);
        rounds.apply_round(3, &mut repo).unwrap();
        assert_eq!(rounds.current().unwrap().round, 2);
        assert!(store.round(2).unwrap().is_some());
    }

    #[test]
    fn reverting_the_closing_block_restores_the_previous_round() {
        let (mut rounds, store) = manager(3);
        let mut repo = wallets(3);
        rounds.restore_current_round(1, &mut repo).unwrap();
        let first = rounds.current().cloned().unwrap();
        rounds.apply_round(3, &mut repo).unwrap();

        rounds.revert_round(3, &mut repo).unwrap();
        assert!(store.round(2).unwrap().is_none());
        assert_eq!(rounds.current(), Some(&first));
    }

    #[test]
    fn too_few_delegates_is_an_invariant_violation() {
        let (mut rounds, _) = manager(5);
        let mut repo = wallets(2);
        let err = rounds.restore_current_round(1, &mut repo).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn future_rounds_are_deleted() {
        let (rounds, store) = manager(3);
        for round in 1..=4 {
            store
                .save_round(&SavedRound {
                    round,
                    delegates: Vec::new(),
                })
                .unwrap();
        }
        // Height 4 is in round 2.
        rounds.delete_future_rounds(3).unwrap();
        assert!(store.round(2).unwrap().is_some());
        assert!(store.round(3).unwrap().is_none());
    }
}
