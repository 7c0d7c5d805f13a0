use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("unknown wallet: {0}")]
    UnknownWallet(String),

    #[error("could not find generator {public_key} of block at height {height}")]
    UnknownGenerator { public_key: String, height: u64 },

    #[error("insufficient balance for {wallet}: need {needed}, have {available}")]
    InsufficientBalance {
        wallet: String,
        needed: u64,
        available: u64,
    },

    #[error("wallet {0} is not a delegate")]
    NotADelegate(String),

    #[error("wallet {0} already votes")]
    AlreadyVoted(String),

    #[error("wallet {wallet} does not vote for {delegate}")]
    VoteMismatch { wallet: String, delegate: String },

    #[error("username {0} is already registered")]
    UsernameTaken(String),

    #[error("wallet {0} is already a delegate")]
    AlreadyDelegate(String),

    #[error("delegate {0} has already resigned")]
    AlreadyResigned(String),

    #[error("delegate {0} has not resigned")]
    NotResigned(String),
}
