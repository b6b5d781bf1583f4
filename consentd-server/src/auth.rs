//! Wallet authentication orchestration
//!
//! Composes the nonce store, canonical message builder, signature recovery
//! and token issuer into the two public operations: issue a challenge and
//! verify a signed response.
//!
//! Per-address states: no challenge -> challenge issued -> verified /
//! expired / failed-retryable. Issuing always supersedes; a signature
//! mismatch leaves the record intact so the legitimate holder can retry
//! until expiry; expiry deletes the record and requires a fresh challenge.

use serde::Serialize;

use consentd_core::auth::{format_timestamp, message_for_record, signature, TokenIssuer, WalletSession};
use consentd_core::*;
use consentd_engine::{IdentityStore, NonceStore};

/// Sign-in profile of this deployment: the fields that go into every
/// challenge message besides the per-challenge ones
#[derive(Debug, Clone)]
pub struct SignInProfile {
    pub domain: String,
    pub uri: String,
    pub statement: String,
}

/// A challenge handed to the client for signing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub address: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    pub expiration_time: String,
    pub message: String,
}

/// A verified session with its bearer credential
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub wallet_address: String,
    pub chain_id: u64,
    pub expires_in: u64,
}

/// Composes nonce lifecycle, message canonicalization, signature recovery
/// and token issuance
pub struct AuthenticationOrchestrator {
    nonces: NonceStore,
    identities: IdentityStore,
    tokens: TokenIssuer,
    profile: SignInProfile,
}

impl AuthenticationOrchestrator {
    pub fn new(
        nonces: NonceStore,
        identities: IdentityStore,
        tokens: TokenIssuer,
        profile: SignInProfile,
    ) -> Self {
        AuthenticationOrchestrator {
            nonces,
            identities,
            tokens,
            profile,
        }
    }

    /// Issue a fresh challenge, superseding any outstanding one for the
    /// address
    pub fn issue_challenge(&self, address: &Address, chain_id: u64) -> Result<Challenge> {
        let record = self
            .nonces
            .issue(address, chain_id, &self.profile.domain, &self.profile.uri)?;

        let message = message_for_record(&record, address, &self.profile.statement);

        Ok(Challenge {
            address: record.address.clone(),
            chain_id: record.chain_id,
            nonce: record.nonce.clone(),
            issued_at: format_timestamp(record.issued_at),
            expiration_time: format_timestamp(record.expires_at),
            message,
        })
    }

    /// Verify a signed challenge response and mint a bearer credential.
    ///
    /// The message is rebuilt from the stored record; a client-supplied
    /// message string is never accepted. The nonce is consumed only after
    /// the signature matches, so a failed attempt can be retried with the
    /// same challenge until it expires.
    pub fn verify(&self, address: &Address, signature_hex: &str) -> Result<Session> {
        let record = self.nonces.fetch(address)?;
        let message = message_for_record(&record, address, &self.profile.statement);

        signature::recover_and_compare(&message, signature_hex, address)?;

        self.nonces.consume(address)?;
        self.identities.get_or_create(address)?;

        let issued = self.tokens.issue(address, record.chain_id)?;

        Ok(Session {
            access_token: issued.token,
            wallet_address: address.to_checksum(),
            chain_id: record.chain_id,
            expires_in: issued.expires_in,
        })
    }

    /// Validate a bearer token presented on an authenticated route
    pub fn authenticate(&self, token: &str) -> Result<WalletSession> {
        self.tokens.verify(token)
    }
}
