//! Personal-message signature recovery
//!
//! Implements the standard personal-message scheme: the signed payload is a
//! fixed textual prefix plus the decimal byte length of the message plus the
//! message itself, hashed with Keccak-256 and ECDSA-recovered over secp256k1.
//! The recovered public key is reduced to a 20-byte account address and
//! compared against the claimed signer.
//!
//! Malformed signatures are validation errors; a well-formed signature that
//! recovers to a different address is an authentication error. The two map to
//! different HTTP statuses at the boundary.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::types::Address;

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Expected signature encoding: r (32) || s (32) || v (1)
pub const SIGNATURE_LENGTH: usize = 65;

/// Keccak-256 digest of the prefixed personal message
pub fn hash_personal_message(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Reduce a secp256k1 public key to its 20-byte account address
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag; the address is the low 20 bytes
    // of the Keccak-256 of the remaining 64
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address::from_bytes(bytes)
}

/// Recover the signing address from a message and a 65-byte signature
pub fn recover_address(message: &str, signature: &[u8]) -> crate::Result<Address> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(crate::ConsentdError::Validation(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }

    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::try_from(recovery_byte).map_err(|_| {
        crate::ConsentdError::Validation(format!("invalid recovery parameter {}", v))
    })?;

    let parsed = Signature::from_slice(&signature[..64])
        .map_err(|e| crate::ConsentdError::Validation(format!("malformed signature: {}", e)))?;

    let digest = hash_personal_message(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &parsed, recovery_id)
        .map_err(|e| crate::ConsentdError::Validation(format!("unrecoverable signature: {}", e)))?;

    Ok(address_from_verifying_key(&key))
}

/// Recover the signer from a hex-encoded signature and compare it against the
/// claimed address
pub fn recover_and_compare(
    message: &str,
    signature_hex: &str,
    claimed: &Address,
) -> crate::Result<()> {
    let signature = decode_signature_hex(signature_hex)?;
    let recovered = recover_address(message, &signature)?;

    if !recovered.ct_eq(claimed) {
        return Err(crate::ConsentdError::Authentication(format!(
            "signature was made by {}, not {}",
            recovered.to_checksum(),
            claimed.to_checksum()
        )));
    }

    Ok(())
}

fn decode_signature_hex(signature_hex: &str) -> crate::Result<Vec<u8>> {
    let digits = signature_hex
        .strip_prefix("0x")
        .or_else(|| signature_hex.strip_prefix("0X"))
        .unwrap_or(signature_hex);

    hex::decode(digits)
        .map_err(|_| crate::ConsentdError::Validation("signature is not valid hex".to_string()))
}
