//! Peer acceptance by software version.

use crate::{NetworkError, Peer};
use semver::{Version, VersionReq};
use std::net::IpAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    InvalidVersion,
}

/// Signal to drop a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerDisconnect {
    pub peer: Peer,
    pub reason: DisconnectReason,
}

#[derive(Clone, Debug, Default)]
pub struct PeerGuard {
    minimum_versions: Vec<VersionReq>,
    whitelist: Vec<IpAddr>,
}

impl PeerGuard {
    pub fn new(minimum_versions: Vec<VersionReq>, whitelist: Vec<IpAddr>) -> Self {
        Self {
            minimum_versions,
            whitelist,
        }
    }

    /// Build from configured requirement strings such as `"^3.0.0"`.
    pub fn from_config(
        minimum_versions: &[String],
        whitelist: Vec<IpAddr>,
    ) -> Result<Self, NetworkError> {
        let minimum_versions = minimum_versions
            .iter()
            .map(|raw| {
                VersionReq::parse(raw).map_err(|e| NetworkError::InvalidRequirement {
                    requirement: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(minimum_versions, whitelist))
    }

    pub fn is_whitelisted(&self, peer: &Peer) -> bool {
        self.whitelist.contains(&peer.ip)
    }

    /// `version` must be strict semver and satisfy at least one minimum
    /// requirement. With no requirements configured any semver passes.
    pub fn is_valid_version(&self, version: &str) -> bool {
        let Ok(version) = Version::parse(version) else {
            return false;
        };
        self.minimum_versions.is_empty()
            || self.minimum_versions.iter().any(|req| req.matches(&version))
    }

    /// One disconnect per non-whitelisted peer with an invalid version.
    pub fn check_versions(&self, peers: &[Peer]) -> Vec<PeerDisconnect> {
        peers
            .iter()
            .filter(|peer| !self.is_whitelisted(peer) && !self.is_valid_version(&peer.version))
            .map(|peer| {
                tracing::debug!(
                    peer = %peer,
                    version = %peer.version,
                    "peer does not meet the minimum version requirements"
                );
                PeerDisconnect {
                    peer: peer.clone(),
                    reason: DisconnectReason::InvalidVersion,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn peer(last_octet: u8, version: &str) -> Peer {
        Peer::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), 4002, version)
    }

    fn guard(whitelist: Vec<IpAddr>) -> PeerGuard {
        PeerGuard::from_config(&["^3.0.0".into(), "^3.0.0-next.0".into()], whitelist).unwrap()
    }

    #[test]
    fn disconnects_peers_below_minimum_version() {
        let peers = vec![
            peer(1, "3.0.0.0.0"),
            peer(2, "2.6"),
            peer(3, "3.0.0"),
            peer(4, "3.0.0-next.1"),
            peer(5, "3.0.1"),
        ];
        let disconnects = guard(Vec::new()).check_versions(&peers);
        assert_eq!(disconnects.len(), 2);
        assert_eq!(disconnects[0].peer, peers[0]);
        assert_eq!(disconnects[1].peer, peers[1]);
        assert!(disconnects
            .iter()
            .all(|d| d.reason == DisconnectReason::InvalidVersion));
    }

    #[test]
    fn whitelisted_peers_are_kept() {
        let old = peer(9, "1.0.0");
        let g = guard(vec![old.ip]);
        assert!(!g.is_valid_version(&old.version));
        assert!(g.check_versions(&[old]).is_empty());
    }

    #[test]
    fn prerelease_needs_prerelease_requirement() {
        let only_release = PeerGuard::from_config(&["^3.0.0".into()], Vec::new()).unwrap();
        assert!(!only_release.is_valid_version("3.0.0-next.1"));
        assert!(guard(Vec::new()).is_valid_version("3.0.0-next.1"));
    }

    #[test]
    fn no_requirements_accepts_any_semver() {
        let g = PeerGuard::default();
        assert!(g.is_valid_version("0.0.1"));
        assert!(!g.is_valid_version("not-a-version"));
    }

    #[test]
    fn rejects_bad_requirement() {
        assert!(matches!(
            PeerGuard::from_config(&["^^3".into()], Vec::new()),
            Err(NetworkError::InvalidRequirement { .. })
        ));
    }
}
