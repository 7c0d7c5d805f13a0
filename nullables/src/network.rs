//! Nullable peer network: scripted responses and call recording.

use async_trait::async_trait;
use dpos_network::{NetworkError, NetworkStatus, Peer, PeerDisconnect, PeerNetwork};
use dpos_types::Block;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    peers: Vec<Peer>,
    downloads: VecDeque<Vec<Block>>,
    download_requests: Vec<u64>,
    status: NetworkStatus,
    health_checks: usize,
    refresh_calls: usize,
    fail_refresh: bool,
    disconnects: Vec<PeerDisconnect>,
}

/// A [`PeerNetwork`] that serves queued block batches instead of talking to
/// peers.
#[derive(Default)]
pub struct NullPeerNetwork {
    inner: Mutex<Inner>,
}

impl NullPeerNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers(peers: Vec<Peer>) -> Self {
        let network = Self::new();
        network.lock().peers = peers;
        network
    }

    /// Queue the response for the next `download_blocks` call.
    pub fn enqueue_download(&self, blocks: Vec<Block>) {
        self.lock().downloads.push_back(blocks);
    }

    pub fn set_status(&self, status: NetworkStatus) {
        self.lock().status = status;
    }

    /// Make `refresh_peers_after_fork` fail.
    pub fn fail_refresh(&self, fail: bool) {
        self.lock().fail_refresh = fail;
    }

    pub fn refresh_calls(&self) -> usize {
        self.lock().refresh_calls
    }

    pub fn health_checks(&self) -> usize {
        self.lock().health_checks
    }

    /// Peers dropped through `disconnect_peer`, in call order.
    pub fn disconnects(&self) -> Vec<PeerDisconnect> {
        self.lock().disconnects.clone()
    }

    /// Heights passed to `download_blocks`, in call order.
    pub fn download_requests(&self) -> Vec<u64> {
        self.lock().download_requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PeerNetwork for NullPeerNetwork {
    async fn peers(&self) -> Vec<Peer> {
        self.lock().peers.clone()
    }

    async fn refresh_peers_after_fork(&self) -> Result<(), NetworkError> {
        let mut inner = self.lock();
        inner.refresh_calls += 1;
        if inner.fail_refresh {
            return Err(NetworkError::RefreshFailed("scripted failure".into()));
        }
        Ok(())
    }

    async fn download_blocks(&self, from_height: u64) -> Result<Vec<Block>, NetworkError> {
        let mut inner = self.lock();
        inner.download_requests.push(from_height);
        Ok(inner.downloads.pop_front().unwrap_or_default())
    }

    async fn check_network_health(&self) -> Result<NetworkStatus, NetworkError> {
        let mut inner = self.lock();
        inner.health_checks += 1;
        Ok(inner.status)
    }

    async fn disconnect_peer(&self, disconnect: &PeerDisconnect) {
        let mut inner = self.lock();
        inner.peers.retain(|p| p.ip != disconnect.peer.ip || p.port != disconnect.peer.port);
        inner.disconnects.push(disconnect.clone());
    }
}
