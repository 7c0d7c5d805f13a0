use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no peers available")]
    NoPeers,

    #[error("peer {0} not found")]
    PeerNotFound(String),

    #[error("download from height {height} failed: {reason}")]
    DownloadFailed { height: u64, reason: String },

    #[error("peer refresh failed: {0}")]
    RefreshFailed(String),

    #[error("invalid version requirement {requirement}: {reason}")]
    InvalidRequirement { requirement: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),
}
