//! Hex string (de)serialization for fixed 32-byte identifiers.

use serde::{de, Deserialize, Deserializer, Serializer};

pub(crate) fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(de::Error::custom)
}

pub(crate) fn parse(s: &str) -> Result<[u8; 32], crate::TypesError> {
    let raw = hex::decode(s).map_err(|e| crate::TypesError::InvalidHex(e.to_string()))?;
    raw.as_slice()
        .try_into()
        .map_err(|_| crate::TypesError::InvalidHex(format!("expected 32 bytes, got {}", raw.len())))
}
