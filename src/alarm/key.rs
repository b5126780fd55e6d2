use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Numeric key correlating a wake event, its notification and its stop action.
///
/// Every derivation goes through [`KeyScheme::derive`], so the key computed when an
/// alarm is scheduled is the one seen again when it fires and when it is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(i64);

impl CorrelationKey {
    /// Used when a fired payload arrives without an identifier.
    pub const MISSING: CorrelationKey = CorrelationKey(0);

    #[cfg(test)]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// First eight bytes of SHA-256 over the UTF-8 identifier, kept non-negative.
    #[default]
    Sha256,
    /// 32-bit polynomial hash over UTF-16 code units, as registered by the mobile
    /// bridge. Distinct identifiers collide easily under this scheme.
    Legacy,
}

impl KeyScheme {
    pub fn derive(self, identifier: &str) -> CorrelationKey {
        match self {
            KeyScheme::Sha256 => {
                let digest = Sha256::digest(identifier.as_bytes());
                let mut prefix = [0_u8; 8];
                prefix.copy_from_slice(&digest[..8]);
                let raw = u64::from_be_bytes(prefix) >> 1;
                // >> 1 keeps the value inside i64::MAX
                CorrelationKey(raw as i64)
            }
            KeyScheme::Legacy => CorrelationKey(i64::from(legacy_string_hash(identifier))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KeyScheme::Sha256 => "sha256",
            KeyScheme::Legacy => "legacy",
        }
    }
}

fn legacy_string_hash(identifier: &str) -> i32 {
    identifier
        .encode_utf16()
        .fold(0_i32, |hash, unit| {
            hash.wrapping_mul(31).wrapping_add(i32::from(unit))
        })
}
