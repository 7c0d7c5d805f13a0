//! Storage contracts for the DPoS consensus core.
//!
//! The consensus core depends only on the [`BlockStore`] trait; the
//! persistent engine behind it is an external collaborator.
//! [`MemoryBlockStore`] is a complete in-memory implementation used by the
//! dev daemon and tests.

pub mod block;
pub mod error;
pub mod memory;
pub mod round;

pub use block::BlockStore;
pub use error::StoreError;
pub use memory::MemoryBlockStore;
pub use round::{RoundDelegate, SavedRound};
