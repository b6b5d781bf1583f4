//! Stateless bearer-token issuance
//!
//! Mints HS256-signed JWTs after a successful wallet verification. No
//! server-side session row backs a token; it is valid until its embedded
//! expiry (revocation is explicitly out of scope).

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Scope claim carried by wallet-auth tokens
pub const WALLET_AUTH_SCOPE: &str = "wallet_auth";

/// Default token lifetime in seconds
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Custom claims embedded in a wallet-auth token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletClaims {
    pub chain_id: u64,
    pub scope: String,
}

/// A freshly minted token with its lifetime
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
}

/// Verified bearer identity extracted from a token
#[derive(Debug, Clone)]
pub struct WalletSession {
    pub address: Address,
    pub chain_id: u64,
}

/// HS256 token issuer and verifier
pub struct TokenIssuer {
    key: HS256Key,
    lifetime_secs: u64,
}

impl TokenIssuer {
    /// Create an issuer from a shared secret and a token lifetime
    pub fn new(secret: &[u8], lifetime_secs: u64) -> Self {
        TokenIssuer {
            key: HS256Key::from_bytes(secret),
            lifetime_secs,
        }
    }

    /// Mint a token for a verified wallet
    pub fn issue(&self, address: &Address, chain_id: u64) -> crate::Result<IssuedToken> {
        let custom = WalletClaims {
            chain_id,
            scope: WALLET_AUTH_SCOPE.to_string(),
        };

        let claims = Claims::with_custom_claims(custom, Duration::from_secs(self.lifetime_secs))
            .with_subject(address.to_checksum());

        let token = self
            .key
            .authenticate(claims)
            .map_err(|e| crate::ConsentdError::Internal(format!("token signing failed: {}", e)))?;

        Ok(IssuedToken {
            token,
            expires_in: self.lifetime_secs,
        })
    }

    /// Verify a bearer token and extract the wallet identity
    pub fn verify(&self, token: &str) -> crate::Result<WalletSession> {
        let mut options = VerificationOptions::default();
        options.time_tolerance = Some(Duration::from_secs(0));

        let claims = self
            .key
            .verify_token::<WalletClaims>(token, Some(options))
            .map_err(|e| {
                crate::ConsentdError::Authentication(format!("invalid bearer token: {}", e))
            })?;

        if claims.custom.scope != WALLET_AUTH_SCOPE {
            return Err(crate::ConsentdError::Authentication(format!(
                "token scope '{}' is not valid here",
                claims.custom.scope
            )));
        }

        let subject = claims.subject.ok_or_else(|| {
            crate::ConsentdError::Authentication("token carries no subject".to_string())
        })?;

        Ok(WalletSession {
            address: Address::parse(&subject)?,
            chain_id: claims.custom.chain_id,
        })
    }
}
