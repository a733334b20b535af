//! PeerId: identifier of a Hypernote instance on the network.
//!
//! Stored as a u64 so it can double as the CRDT replica id, rendered as a
//! 16 character lowercase hex string everywhere else (frames, logs, CLI).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("Invalid peer ID format: expected 16 hex chars")]
    InvalidFormat,
    #[error("Invalid peer ID: zero is reserved")]
    Zero,
}

/// # Examples
/// ```
/// use hypernote_core::PeerId;
///
/// let parsed: PeerId = "a1b2c3d4e5f67890".parse().unwrap();
/// assert_eq!(parsed.as_u64(), 0xa1b2c3d4e5f67890);
/// assert_eq!(parsed.to_string(), "a1b2c3d4e5f67890");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Random, never zero.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PeerIdError::InvalidFormat);
        }
        let id = u64::from_str_radix(s, 16).map_err(|_| PeerIdError::InvalidFormat)?;
        if id == 0 {
            return Err(PeerIdError::Zero);
        }
        Ok(Self(id))
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// Hex string on the wire, same as Display
impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_zero_padded() {
        assert_eq!(PeerId(0xff).to_string(), "00000000000000ff");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let lower: PeerId = "a1b2c3d4e5f67890".parse().unwrap();
        let upper: PeerId = "A1B2C3D4E5F67890".parse().unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!("abc".parse::<PeerId>(), Err(PeerIdError::InvalidFormat));
        assert_eq!(
            "ghijklmnopqrstuv".parse::<PeerId>(),
            Err(PeerIdError::InvalidFormat)
        );
        assert_eq!("+1b2c3d4e5f67890".parse::<PeerId>(), Err(PeerIdError::InvalidFormat));
        assert_eq!("0000000000000000".parse::<PeerId>(), Err(PeerIdError::Zero));
    }

    #[test]
    fn test_generated_ids_round_trip() {
        for _ in 0..100 {
            let id = PeerId::generate();
            assert_ne!(id.as_u64(), 0);
            assert_eq!(id.to_string().parse::<PeerId>().unwrap(), id);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let id = PeerId(0xa1b2c3d4e5f67890);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"a1b2c3d4e5f67890\"");
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
