//! Wallet state: the in-memory wallet repository the consensus core reads
//! and annotates.
//!
//! - [`wallet`]: wallet and delegate attributes.
//! - [`repository`]: indexed wallet storage plus block/transaction effects.
//! - [`error`]: wallet state errors.

pub mod error;
pub mod repository;
pub mod wallet;

pub use error::StateError;
pub use repository::WalletRepository;
pub use wallet::{DelegateAttributes, Wallet};
