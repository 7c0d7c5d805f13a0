//! Error type for malformed fundamental values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid hex identifier: {0}")]
    InvalidHex(String),

    #[error("invalid milestone schedule: {0}")]
    InvalidMilestones(String),
}
