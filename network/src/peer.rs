use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// A remote node as reported by the peer network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
    /// Self-reported software version; not guaranteed to be semver.
    pub version: String,
    /// Last height the peer announced.
    #[serde(default)]
    pub height: Option<u64>,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16, version: impl Into<String>) -> Self {
        Self {
            ip,
            port,
            version: version.into(),
            height: None,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
