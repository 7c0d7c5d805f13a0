//! Peer network for a node running on its own.

use async_trait::async_trait;
use dpos_network::{NetworkError, NetworkStatus, Peer, PeerDisconnect, PeerNetwork};
use dpos_types::Block;

/// No peers, nothing to download, never forked.
pub struct StandaloneNetwork;

#[async_trait]
impl PeerNetwork for StandaloneNetwork {
    async fn peers(&self) -> Vec<Peer> {
        Vec::new()
    }

    async fn refresh_peers_after_fork(&self) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn download_blocks(&self, _from_height: u64) -> Result<Vec<Block>, NetworkError> {
        Ok(Vec::new())
    }

    async fn check_network_health(&self) -> Result<NetworkStatus, NetworkError> {
        Ok(NetworkStatus::healthy())
    }

    async fn disconnect_peer(&self, disconnect: &PeerDisconnect) {
        tracing::debug!(peer = %disconnect.peer, "standalone network has no peers to drop");
    }
}
