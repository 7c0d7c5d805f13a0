//! Delegate and wallet public keys.

use crate::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte public key identifying a wallet or delegate.
///
/// Ordering is byte-wise, which equals ascending lexicographic order of the
/// lowercase hex rendering used by ranking tie-breaks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "crate::hex_serde")] pub [u8; 32]);

impl PublicKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for PublicKey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::hex_serde::parse(s).map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_hex_ordering() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 0x0a;
        b[0] = 0xa0;
        let (a, b) = (PublicKey::new(a), PublicKey::new(b));
        assert!(a < b);
        assert!(a.to_hex() < b.to_hex());
    }

    #[test]
    fn parses_hex() {
        let key = PublicKey::new([7u8; 32]);
        let parsed: PublicKey = key.to_hex().parse().expect("valid hex");
        assert_eq!(parsed, key);
        assert!("abcd".parse::<PublicKey>().is_err());
    }
}
