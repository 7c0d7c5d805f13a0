//! Peer network contract.
//!
//! The consensus core does not implement peer discovery or wire framing; it
//! drives whatever implements [`PeerNetwork`]. [`PeerGuard`] holds the
//! peer acceptance rules the core needs locally (minimum versions).

pub mod error;
pub mod guard;
pub mod peer;
pub mod service;

pub use error::NetworkError;
pub use guard::{DisconnectReason, PeerDisconnect, PeerGuard};
pub use peer::Peer;
pub use service::{NetworkStatus, PeerNetwork};
