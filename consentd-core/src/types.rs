//! Core data types for consentd

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;

use crate::flags::PermissionMask;

/// A 20-byte account identifier, rendered externally in EIP-55 checksum form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Parse a `0x`-prefixed, 40-hex-digit address string.
    ///
    /// Letter case is not significant on input; the checksum form is an
    /// output concern only.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| {
                crate::ConsentdError::Validation(format!("address '{}' missing 0x prefix", s))
            })?;

        if digits.len() != 40 {
            return Err(crate::ConsentdError::Validation(format!(
                "address '{}' must be 40 hex digits, got {}",
                s,
                digits.len()
            )));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| {
            crate::ConsentdError::Validation(format!("address '{}' is not valid hex", s))
        })?;

        Ok(Address(bytes))
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Render the canonical EIP-55 mixed-case checksum form.
    ///
    /// A hex letter is uppercased when the corresponding nibble of
    /// Keccak-256(lowercase hex digits) is >= 8.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Constant-time equality on the raw bytes
    pub fn ct_eq(&self, other: &Address) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Address, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a registered asset (`did:op:...`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetDid(String);

impl AssetDid {
    /// Create a new asset DID with validation
    pub fn new(did: &str) -> crate::Result<Self> {
        if did.is_empty() {
            return Err(crate::ConsentdError::Validation("empty asset DID".to_string()));
        }

        if did.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(crate::ConsentdError::Validation(format!(
                "asset DID '{}' contains whitespace or control characters",
                did
            )));
        }

        Ok(AssetDid(did.to_string()))
    }

    /// Get the DID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetDid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consent identifier using ULID for time-ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConsentId(ulid::Ulid);

impl ConsentId {
    /// Generate a new identifier with current timestamp
    pub fn new() -> Self {
        ConsentId(ulid::Ulid::new())
    }

    /// Parse from the canonical 26-character string form
    pub fn parse(s: &str) -> crate::Result<Self> {
        let ulid = ulid::Ulid::from_string(s).map_err(|_| {
            crate::ConsentdError::NotFound(format!("unknown consent petition '{}'", s))
        })?;
        Ok(ConsentId(ulid))
    }
}

impl Default for ConsentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConsentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived negotiation state of a consent petition.
///
/// Pending is the only state that exists without a response; the other three
/// are pure functions of (request, grant) and are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentStatus {
    Pending,
    Accepted,
    Denied,
    Resolved,
}

impl std::fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConsentStatus::Pending => "Pending",
            ConsentStatus::Accepted => "Accepted",
            ConsentStatus::Denied => "Denied",
            ConsentStatus::Resolved => "Resolved",
        };
        write!(f, "{}", label)
    }
}

/// A consent petition: one party asking for permission flags over another's
/// dataset, for use by a given algorithm. Immutable after creation except for
/// its at-most-one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consent {
    pub id: ConsentId,
    pub dataset: AssetDid,
    pub dataset_owner: Address,
    pub algorithm: AssetDid,
    pub algorithm_owner: Address,
    pub solicitor: Address,
    pub request: PermissionMask,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// The dataset owner's answer to a consent petition. At most one per consent.
///
/// The status is derived from (request, permitted) on read, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentResponse {
    pub consent: ConsentId,
    pub permitted: PermissionMask,
    pub reason: String,
    pub responded_at: DateTime<Utc>,
}

/// One outstanding sign-in challenge per wallet address.
///
/// Holds every field needed to reconstruct the signed message server-side,
/// so a client-supplied message string is never trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceRecord {
    pub address: String,
    pub nonce: String,
    pub chain_id: u64,
    pub domain: String,
    pub uri: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NonceRecord {
    /// Whether the challenge has passed its TTL at the given instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A wallet identity, created lazily on first successful verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub address: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_checksum() {
        // Known EIP-55 vector
        let addr = Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(addr.to_checksum(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");

        // Any letter case parses to the same address
        let upper = Address::parse("0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED").unwrap();
        assert_eq!(addr, upper);
    }

    #[test]
    fn test_address_checksum_vectors() {
        for expected in [
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let parsed = Address::parse(&expected.to_lowercase()).unwrap();
            assert_eq!(parsed.to_checksum(), expected);
        }
    }

    #[test]
    fn test_address_rejects_malformed() {
        assert!(Address::parse("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").is_err());
        assert!(Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1bea").is_err());
        assert!(Address::parse("0xZZaeb6053f3e94c9b9a09f33669435e7ef1beaed").is_err());
        assert!(Address::parse("").is_err());
    }

    #[test]
    fn test_asset_did_validation() {
        assert!(AssetDid::new("did:op:75afadb65591ca977344fa598c2b42c0").is_ok());
        assert!(AssetDid::new("").is_err());
        assert!(AssetDid::new("did:op: with space").is_err());
    }

    #[test]
    fn test_consent_id_roundtrip() {
        let id = ConsentId::new();
        let parsed = ConsentId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);

        assert!(ConsentId::parse("not-a-ulid").is_err());
    }
}
