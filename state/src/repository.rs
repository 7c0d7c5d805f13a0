//! Indexed wallet storage and the wallet effects of blocks and transactions.
//!
//! Vote balances are maintained incrementally: every mutation first detaches
//! the touched wallets' voting weight from the delegates they vote for, then
//! mutates, then re-attaches the (possibly changed) weight to the (possibly
//! changed) delegate. `vote_balance(d) == Σ voting_weight(v)` over the voters
//! of `d` therefore holds after every successful apply or revert.

use crate::{DelegateAttributes, StateError, Wallet};
use dpos_types::{Address, Block, PublicKey, Transaction, TransactionKind};
use std::collections::HashMap;

/// In-memory wallet repository indexed by address, public key and username.
#[derive(Clone, Debug, Default)]
pub struct WalletRepository {
    by_address: HashMap<Address, Wallet>,
    by_public_key: HashMap<PublicKey, Address>,
    by_username: HashMap<String, Address>,
}

impl WalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a wallet and refresh its secondary indexes.
    pub fn index(&mut self, wallet: Wallet) {
        if let Some(previous) = self.by_address.get(&wallet.address) {
            if let Some(name) = previous.username() {
                self.by_username.remove(name);
            }
            if let Some(pk) = previous.public_key {
                self.by_public_key.remove(&pk);
            }
        }
        if let Some(pk) = wallet.public_key {
            self.by_public_key.insert(pk, wallet.address.clone());
        }
        if let Some(name) = wallet.username() {
            self.by_username
                .insert(name.to_string(), wallet.address.clone());
        }
        self.by_address.insert(wallet.address.clone(), wallet);
    }

    pub fn find_by_address(&self, address: &Address) -> Option<&Wallet> {
        self.by_address.get(address)
    }

    pub fn find_by_address_mut(&mut self, address: &Address) -> Option<&mut Wallet> {
        self.by_address.get_mut(address)
    }

    pub fn find_by_public_key(&self, public_key: &PublicKey) -> Option<&Wallet> {
        self.by_public_key
            .get(public_key)
            .and_then(|a| self.by_address.get(a))
    }

    pub fn find_by_public_key_mut(&mut self, public_key: &PublicKey) -> Option<&mut Wallet> {
        let address = self.by_public_key.get(public_key)?;
        self.by_address.get_mut(address)
    }

    pub fn find_by_username(&self, username: &str) -> Option<&Wallet> {
        self.by_username
            .get(username)
            .and_then(|a| self.by_address.get(a))
    }

    /// Every wallet with a known public key.
    pub fn all_by_public_key(&self) -> impl Iterator<Item = &Wallet> {
        self.by_public_key
            .values()
            .filter_map(|a| self.by_address.get(a))
    }

    /// Every registered delegate, resigned or not.
    pub fn all_by_username(&self) -> impl Iterator<Item = &Wallet> {
        self.by_username
            .values()
            .filter_map(|a| self.by_address.get(a))
    }

    pub fn all(&self) -> impl Iterator<Item = &Wallet> {
        self.by_address.values()
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut Wallet> {
        self.by_address.values_mut()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_address.clear();
        self.by_public_key.clear();
        self.by_username.clear();
    }

    /// Mutable delegate attributes of the wallet owning `public_key`.
    pub fn delegate_mut(
        &mut self,
        public_key: &PublicKey,
    ) -> Result<&mut DelegateAttributes, StateError> {
        self.find_by_public_key_mut(public_key)
            .ok_or_else(|| StateError::UnknownWallet(public_key.to_hex()))?
            .delegate
            .as_mut()
            .ok_or_else(|| StateError::NotADelegate(public_key.to_hex()))
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// Apply a block's transactions and credit its generator.
    ///
    /// If a transaction fails, the transactions applied before it are
    /// reverted and the error is returned; the repository is left unchanged.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), StateError> {
        let generator = self.generator_address(block)?;

        for (applied, tx) in block.transactions.iter().enumerate() {
            if let Err(e) = self.apply_transaction(tx) {
                for done in block.transactions[..applied].iter().rev() {
                    if let Err(revert_err) = self.revert_transaction(done) {
                        tracing::error!(
                            tx_id = %done.id,
                            error = %revert_err,
                            "failed to undo transaction after block apply failure"
                        );
                    }
                }
                return Err(e);
            }
        }

        self.credit_generator(&generator, block)
    }

    fn credit_generator(&mut self, generator: &Address, block: &Block) -> Result<(), StateError> {
        self.reweigh(&[generator.clone()], |repo| {
            let wallet = repo.wallet_mut(generator)?;
            wallet.balance = wallet.balance.saturating_add(block.generator_income());
            if let Some(delegate) = wallet.delegate.as_mut() {
                delegate.produced_blocks += 1;
                delegate.forged_rewards = delegate.forged_rewards.saturating_add(block.reward);
                delegate.forged_fees = delegate.forged_fees.saturating_add(block.total_fee);
                delegate.last_block = Some(block.id);
            }
            Ok(())
        })
    }

    /// Undo [`apply_block`](Self::apply_block). Like applying, a failure
    /// leaves the repository unchanged.
    pub fn revert_block(&mut self, block: &Block) -> Result<(), StateError> {
        let generator = self
            .by_public_key
            .get(&block.generator_public_key)
            .cloned()
            .ok_or_else(|| StateError::UnknownGenerator {
                public_key: block.generator_public_key.to_hex(),
                height: block.height,
            })?;

        self.reweigh(&[generator.clone()], |repo| {
            let wallet = repo.wallet_mut(&generator)?;
            let income = block.generator_income();
            if wallet.balance < income {
                return Err(StateError::InsufficientBalance {
                    wallet: generator.to_string(),
                    needed: income,
                    available: wallet.balance,
                });
            }
            wallet.balance -= income;
            if let Some(delegate) = wallet.delegate.as_mut() {
                delegate.produced_blocks = delegate.produced_blocks.saturating_sub(1);
                delegate.forged_rewards = delegate.forged_rewards.saturating_sub(block.reward);
                delegate.forged_fees = delegate.forged_fees.saturating_sub(block.total_fee);
                delegate.last_block = None;
            }
            Ok(())
        })?;

        for (reverted, tx) in block.transactions.iter().rev().enumerate() {
            if let Err(e) = self.revert_transaction(tx) {
                let first_reverted = block.transactions.len() - reverted;
                for done in &block.transactions[first_reverted..] {
                    if let Err(apply_err) = self.apply_transaction(done) {
                        tracing::error!(
                            tx_id = %done.id,
                            error = %apply_err,
                            "failed to redo transaction after block revert failure"
                        );
                    }
                }
                if let Err(credit_err) = self.credit_generator(&generator, block) {
                    tracing::error!(
                        height = block.height,
                        error = %credit_err,
                        "failed to re-credit generator after block revert failure"
                    );
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn generator_address(&mut self, block: &Block) -> Result<Address, StateError> {
        if let Some(address) = self.by_public_key.get(&block.generator_public_key) {
            return Ok(address.clone());
        }
        if block.height != 1 {
            return Err(StateError::UnknownGenerator {
                public_key: block.generator_public_key.to_hex(),
                height: block.height,
            });
        }
        // The genesis generator may be absent from the genesis wallet set.
        let mut wallet = Wallet::new(Address::new(block.generator_public_key.to_hex()));
        wallet.public_key = Some(block.generator_public_key);
        let address = wallet.address.clone();
        self.index(wallet);
        Ok(address)
    }

    // ── Transactions ────────────────────────────────────────────────────

    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), StateError> {
        let sender = self.address_of(&tx.sender_public_key)?;
        let debit = tx.total_debit();
        let available = self.wallet(&sender)?.balance;
        if available < debit {
            return Err(StateError::InsufficientBalance {
                wallet: sender.to_string(),
                needed: debit,
                available,
            });
        }

        match &tx.kind {
            TransactionKind::Transfer { recipient, amount } => {
                let created = !self.by_address.contains_key(recipient);
                if created {
                    self.index(Wallet::new(recipient.clone()));
                }
                let result = self.reweigh(&[sender.clone(), recipient.clone()], |repo| {
                    repo.wallet_mut(&sender)?.balance -= debit;
                    let to = repo.wallet_mut(recipient)?;
                    to.balance = to.balance.saturating_add(*amount);
                    Ok(())
                });
                if created && result.is_err() {
                    self.by_address.remove(recipient);
                }
                result
            }
            TransactionKind::DelegateRegistration { username } => {
                if self.wallet(&sender)?.is_delegate() {
                    return Err(StateError::AlreadyDelegate(sender.to_string()));
                }
                if self.by_username.contains_key(username) {
                    return Err(StateError::UsernameTaken(username.clone()));
                }
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.balance -= debit;
                    wallet.delegate = Some(DelegateAttributes {
                        username: username.clone(),
                        ..DelegateAttributes::default()
                    });
                    Ok(())
                })?;
                self.by_username.insert(username.clone(), sender);
                Ok(())
            }
            TransactionKind::DelegateResignation => {
                match &self.wallet(&sender)?.delegate {
                    None => return Err(StateError::NotADelegate(sender.to_string())),
                    Some(d) if d.resigned => {
                        return Err(StateError::AlreadyResigned(d.username.clone()))
                    }
                    Some(_) => {}
                }
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.balance -= debit;
                    if let Some(d) = wallet.delegate.as_mut() {
                        d.resigned = true;
                    }
                    Ok(())
                })
            }
            TransactionKind::Vote { delegate } => {
                if self.wallet(&sender)?.has_voted() {
                    return Err(StateError::AlreadyVoted(sender.to_string()));
                }
                self.require_delegate(delegate)?;
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.balance -= debit;
                    wallet.vote = Some(*delegate);
                    Ok(())
                })
            }
            TransactionKind::Unvote { delegate } => {
                if self.wallet(&sender)?.vote != Some(*delegate) {
                    return Err(StateError::VoteMismatch {
                        wallet: sender.to_string(),
                        delegate: delegate.to_hex(),
                    });
                }
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.balance -= debit;
                    wallet.vote = None;
                    Ok(())
                })
            }
            TransactionKind::HtlcLock { amount } => self.reweigh(&[sender.clone()], |repo| {
                let wallet = repo.wallet_mut(&sender)?;
                wallet.balance -= debit;
                wallet.htlc_locked_balance = wallet.htlc_locked_balance.saturating_add(*amount);
                Ok(())
            }),
        }
    }

    pub fn revert_transaction(&mut self, tx: &Transaction) -> Result<(), StateError> {
        let sender = self.address_of(&tx.sender_public_key)?;
        let credit = tx.total_debit();

        match &tx.kind {
            TransactionKind::Transfer { recipient, amount } => {
                let held = self.wallet(recipient)?.balance;
                if held < *amount {
                    return Err(StateError::InsufficientBalance {
                        wallet: recipient.to_string(),
                        needed: *amount,
                        available: held,
                    });
                }
                self.reweigh(&[sender.clone(), recipient.clone()], |repo| {
                    repo.wallet_mut(recipient)?.balance -= amount;
                    let from = repo.wallet_mut(&sender)?;
                    from.balance = from.balance.saturating_add(credit);
                    Ok(())
                })?;
                self.forget_if_empty(recipient);
                Ok(())
            }
            TransactionKind::DelegateRegistration { username } => {
                if !self.wallet(&sender)?.is_delegate() {
                    return Err(StateError::NotADelegate(sender.to_string()));
                }
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.balance = wallet.balance.saturating_add(credit);
                    wallet.delegate = None;
                    Ok(())
                })?;
                self.by_username.remove(username);
                Ok(())
            }
            TransactionKind::DelegateResignation => {
                if !self.wallet(&sender)?.is_resigned() {
                    return Err(StateError::NotResigned(sender.to_string()));
                }
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.balance = wallet.balance.saturating_add(credit);
                    if let Some(d) = wallet.delegate.as_mut() {
                        d.resigned = false;
                    }
                    Ok(())
                })
            }
            TransactionKind::Vote { delegate } => {
                if self.wallet(&sender)?.vote != Some(*delegate) {
                    return Err(StateError::VoteMismatch {
                        wallet: sender.to_string(),
                        delegate: delegate.to_hex(),
                    });
                }
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.balance = wallet.balance.saturating_add(credit);
                    wallet.vote = None;
                    Ok(())
                })
            }
            TransactionKind::Unvote { delegate } => {
                if self.wallet(&sender)?.has_voted() {
                    return Err(StateError::AlreadyVoted(sender.to_string()));
                }
                self.require_delegate(delegate)?;
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.balance = wallet.balance.saturating_add(credit);
                    wallet.vote = Some(*delegate);
                    Ok(())
                })
            }
            TransactionKind::HtlcLock { amount } => {
                let locked = self.wallet(&sender)?.htlc_locked_balance;
                if locked < *amount {
                    return Err(StateError::InsufficientBalance {
                        wallet: sender.to_string(),
                        needed: *amount,
                        available: locked,
                    });
                }
                self.reweigh(&[sender.clone()], |repo| {
                    let wallet = repo.wallet_mut(&sender)?;
                    wallet.htlc_locked_balance -= amount;
                    wallet.balance = wallet.balance.saturating_add(credit);
                    Ok(())
                })
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// Detach the voting weight of `addresses`, run `mutate`, re-attach.
    ///
    /// `mutate` must validate before changing anything: weight is re-attached
    /// even when it fails.
    fn reweigh<F>(&mut self, addresses: &[Address], mutate: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut Self) -> Result<(), StateError>,
    {
        let mut unique: Vec<&Address> = Vec::with_capacity(addresses.len());
        for a in addresses {
            if !unique.contains(&a) {
                unique.push(a);
            }
        }

        for address in &unique {
            self.shift_vote_weight(address, false)?;
        }
        let result = mutate(self);
        for address in &unique {
            self.shift_vote_weight(address, true)?;
        }
        result
    }

    fn shift_vote_weight(&mut self, address: &Address, attach: bool) -> Result<(), StateError> {
        let (vote, weight) = {
            let wallet = self.wallet(address)?;
            (wallet.vote, wallet.voting_weight())
        };
        if let Some(delegate) = vote {
            let attrs = self.delegate_mut(&delegate)?;
            attrs.vote_balance = if attach {
                attrs.vote_balance.saturating_add(weight)
            } else {
                attrs.vote_balance.saturating_sub(weight)
            };
        }
        Ok(())
    }

    /// Drop a wallet that carries no state, such as a transfer recipient
    /// whose only transfer was reverted.
    fn forget_if_empty(&mut self, address: &Address) {
        if self
            .by_address
            .get(address)
            .is_some_and(|w| *w == Wallet::new(address.clone()))
        {
            self.by_address.remove(address);
        }
    }

    fn require_delegate(&self, public_key: &PublicKey) -> Result<(), StateError> {
        match self.find_by_public_key(public_key) {
            Some(w) if w.is_delegate() => Ok(()),
            _ => Err(StateError::NotADelegate(public_key.to_hex())),
        }
    }

    fn address_of(&self, public_key: &PublicKey) -> Result<Address, StateError> {
        self.by_public_key
            .get(public_key)
            .cloned()
            .ok_or_else(|| StateError::UnknownWallet(public_key.to_hex()))
    }

    fn wallet(&self, address: &Address) -> Result<&Wallet, StateError> {
        self.by_address
            .get(address)
            .ok_or_else(|| StateError::UnknownWallet(address.to_string()))
    }

    fn wallet_mut(&mut self, address: &Address) -> Result<&mut Wallet, StateError> {
        self.by_address
            .get_mut(address)
            .ok_or_else(|| StateError::UnknownWallet(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpos_types::{BlockId, Timestamp};

    fn key(n: u8) -> PublicKey {
        PublicKey::new([n; 32])
    }

    fn wallet(n: u8, balance: u64) -> Wallet {
        let mut w = Wallet::new(Address::new(format!("addr{n}")));
        w.public_key = Some(key(n));
        w.balance = balance;
        w
    }

    fn delegate(n: u8, balance: u64) -> Wallet {
        let mut w = wallet(n, balance);
        w.delegate = Some(DelegateAttributes {
            username: format!("delegate{n}"),
            ..DelegateAttributes::default()
        });
        w
    }

    fn tx(sender: u8, fee: u64, kind: TransactionKind) -> Transaction {
        Transaction {
            id: format!("tx-{sender}-{fee}"),
            sender_public_key: key(sender),
            fee,
            kind,
        }
    }

    fn vote_balance(repo: &WalletRepository, n: u8) -> u64 {
        repo.find_by_public_key(&key(n))
            .and_then(|w| w.delegate.as_ref())
            .map(|d| d.vote_balance)
            .unwrap_or_default()
    }

    fn block(height: u64, generator: u8, transactions: Vec<Transaction>) -> Block {
        Block {
            height,
            id: BlockId::new([height as u8; 32]),
            previous_block_id: (height > 1).then(|| BlockId::new([height as u8 - 1; 32])),
            timestamp: Timestamp::new(height * 8),
            generator_public_key: key(generator),
            reward: 200,
            total_fee: transactions.iter().map(|t| t.fee).sum(),
            transactions,
        }
    }

    #[test]
    fn indexes_are_kept_in_sync() {
        let mut repo = WalletRepository::new();
        repo.index(delegate(1, 10));
        repo.index(wallet(2, 5));

        assert_eq!(repo.find_by_username("delegate1").map(|w| w.balance), Some(10));
        assert_eq!(repo.find_by_address(&Address::new("addr2")).map(|w| w.balance), Some(5));
        assert_eq!(repo.all_by_username().count(), 1);
        assert_eq!(repo.all_by_public_key().count(), 2);
    }

    #[test]
    fn vote_and_unvote_move_voting_weight() {
        let mut repo = WalletRepository::new();
        repo.index(delegate(1, 0));
        repo.index(wallet(2, 1_000));

        let vote = tx(2, 10, TransactionKind::Vote { delegate: key(1) });
        repo.apply_transaction(&vote).expect("vote");
        assert_eq!(vote_balance(&repo, 1), 990);

        let unvote = tx(2, 10, TransactionKind::Unvote { delegate: key(1) });
        repo.apply_transaction(&unvote).expect("unvote");
        assert_eq!(vote_balance(&repo, 1), 0);

        repo.revert_transaction(&unvote).expect("revert unvote");
        assert_eq!(vote_balance(&repo, 1), 990);
        repo.revert_transaction(&vote).expect("revert vote");
        assert_eq!(vote_balance(&repo, 1), 0);
        assert_eq!(repo.find_by_public_key(&key(2)).unwrap().balance, 1_000);
    }

    #[test]
    fn transfer_updates_both_sides_vote_balances() {
        let mut repo = WalletRepository::new();
        repo.index(delegate(1, 0));
        repo.index(delegate(2, 0));
        let mut alice = wallet(3, 1_000);
        alice.vote = Some(key(1));
        repo.index(alice);
        let mut bob = wallet(4, 0);
        bob.vote = Some(key(2));
        repo.index(bob);
        repo.delegate_mut(&key(1)).unwrap().vote_balance = 1_000;

        let transfer = tx(
            3,
            10,
            TransactionKind::Transfer {
                recipient: Address::new("addr4"),
                amount: 300,
            },
        );
        repo.apply_transaction(&transfer).expect("transfer");
        assert_eq!(vote_balance(&repo, 1), 690);
        assert_eq!(vote_balance(&repo, 2), 300);

        repo.revert_transaction(&transfer).expect("revert");
        assert_eq!(vote_balance(&repo, 1), 1_000);
        assert_eq!(vote_balance(&repo, 2), 0);
    }

    #[test]
    fn htlc_lock_keeps_weight_minus_fee() {
        let mut repo = WalletRepository::new();
        repo.index(delegate(1, 0));
        let mut voter = wallet(2, 1_000);
        voter.vote = Some(key(1));
        repo.index(voter);
        repo.delegate_mut(&key(1)).unwrap().vote_balance = 1_000;

        repo.apply_transaction(&tx(2, 5, TransactionKind::HtlcLock { amount: 400 }))
            .expect("lock");
        let voter = repo.find_by_public_key(&key(2)).unwrap();
        assert_eq!(voter.balance, 595);
        assert_eq!(voter.htlc_locked_balance, 400);
        assert_eq!(vote_balance(&repo, 1), 995);
    }

    #[test]
    fn rejects_overspend_without_side_effects() {
        let mut repo = WalletRepository::new();
        repo.index(wallet(1, 50));
        let err = repo
            .apply_transaction(&tx(
                1,
                1,
                TransactionKind::Transfer {
                    recipient: Address::new("elsewhere"),
                    amount: 50,
                },
            ))
            .unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { needed: 51, .. }));
        assert!(repo.find_by_address(&Address::new("elsewhere")).is_none());
    }

    #[test]
    fn registration_and_resignation_round_trip() {
        let mut repo = WalletRepository::new();
        repo.index(wallet(1, 100));
        let register = tx(
            1,
            25,
            TransactionKind::DelegateRegistration {
                username: "genesis_1".into(),
            },
        );
        repo.apply_transaction(&register).expect("register");
        assert!(repo.find_by_username("genesis_1").is_some());

        let resign = tx(1, 25, TransactionKind::DelegateResignation);
        repo.apply_transaction(&resign).expect("resign");
        assert!(repo.find_by_public_key(&key(1)).unwrap().is_resigned());
        assert!(matches!(
            repo.apply_transaction(&resign),
            Err(StateError::AlreadyResigned(_))
        ));

        repo.revert_transaction(&resign).expect("revert resign");
        repo.revert_transaction(&register).expect("revert register");
        assert!(repo.find_by_username("genesis_1").is_none());
        assert_eq!(repo.find_by_public_key(&key(1)).unwrap().balance, 100);
    }

    #[test]
    fn apply_block_credits_generator_and_its_delegate() {
        let mut repo = WalletRepository::new();
        repo.index(delegate(1, 0));
        let mut forger = delegate(2, 0);
        forger.vote = Some(key(1));
        repo.index(forger);

        let b = block(2, 2, Vec::new());
        repo.apply_block(&b).expect("apply");
        let forger = repo.find_by_public_key(&key(2)).unwrap();
        assert_eq!(forger.balance, 200);
        assert_eq!(forger.delegate.as_ref().unwrap().produced_blocks, 1);
        assert_eq!(vote_balance(&repo, 1), 200);

        repo.revert_block(&b).expect("revert");
        assert_eq!(repo.find_by_public_key(&key(2)).unwrap().balance, 0);
        assert_eq!(vote_balance(&repo, 1), 0);
    }

    #[test]
    fn failed_block_leaves_repository_unchanged() {
        let mut repo = WalletRepository::new();
        repo.index(delegate(1, 0));
        repo.index(wallet(2, 100));

        let good = tx(
            2,
            0,
            TransactionKind::Transfer {
                recipient: Address::new("addr9"),
                amount: 60,
            },
        );
        let bad = tx(
            2,
            0,
            TransactionKind::Transfer {
                recipient: Address::new("addr9"),
                amount: 60,
            },
        );
        let err = repo.apply_block(&block(2, 1, vec![good, bad]));
        assert!(err.is_err());
        assert_eq!(repo.find_by_public_key(&key(2)).unwrap().balance, 100);
        assert_eq!(repo.find_by_public_key(&key(1)).unwrap().balance, 0);
        assert!(repo.find_by_address(&Address::new("addr9")).is_none());
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn overspent_transfer_does_not_create_its_recipient() {
        let mut repo = WalletRepository::new();
        repo.index(wallet(2, 10));

        let transfer = tx(
            2,
            0,
            TransactionKind::Transfer {
                recipient: Address::new("fresh"),
                amount: 60,
            },
        );
        assert!(repo.apply_transaction(&transfer).is_err());
        assert!(repo.find_by_address(&Address::new("fresh")).is_none());
    }

    #[test]
    fn failed_revert_leaves_repository_unchanged() {
        let mut repo = WalletRepository::new();
        repo.index(delegate(1, 0));
        repo.index(wallet(2, 100));
        let transfer = tx(
            2,
            0,
            TransactionKind::Transfer {
                recipient: Address::new("addr9"),
                amount: 60,
            },
        );
        let block = block(2, 1, vec![transfer]);
        repo.apply_block(&block).unwrap();

        // The recipient spent part of the transfer elsewhere.
        repo.find_by_address_mut(&Address::new("addr9")).unwrap().balance = 10;

        assert!(repo.revert_block(&block).is_err());
        let generator = repo.find_by_public_key(&key(1)).unwrap();
        assert_eq!(generator.balance, 200);
        assert_eq!(generator.delegate.as_ref().unwrap().produced_blocks, 1);
        assert_eq!(generator.delegate.as_ref().unwrap().last_block, Some(block.id));
        assert_eq!(repo.find_by_public_key(&key(2)).unwrap().balance, 40);
    }

    #[test]
    fn reverted_transfer_forgets_the_new_recipient() {
        let mut repo = WalletRepository::new();
        repo.index(delegate(1, 0));
        repo.index(wallet(2, 100));
        let transfer = tx(
            2,
            0,
            TransactionKind::Transfer {
                recipient: Address::new("addr9"),
                amount: 60,
            },
        );
        let block = block(2, 1, vec![transfer]);
        repo.apply_block(&block).unwrap();
        assert!(repo.find_by_address(&Address::new("addr9")).is_some());

        repo.revert_block(&block).unwrap();
        assert!(repo.find_by_address(&Address::new("addr9")).is_none());
        assert_eq!(repo.find_by_public_key(&key(2)).unwrap().balance, 100);
    }

    #[test]
    fn unknown_generator_is_only_tolerated_at_genesis() {
        let mut repo = WalletRepository::new();
        assert!(matches!(
            repo.apply_block(&block(5, 7, Vec::new())),
            Err(StateError::UnknownGenerator { height: 5, .. })
        ));
        repo.apply_block(&block(1, 7, Vec::new())).expect("genesis");
        assert!(repo.find_by_public_key(&key(7)).is_some());
    }
}
