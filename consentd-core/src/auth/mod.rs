//! Wallet authentication primitives for consentd
//!
//! This module implements the cryptographic half of the sign-in flow:
//! - Canonical sign-in message construction (both the issuing and the
//!   verifying path rebuild it from stored fields)
//! - Personal-message signature recovery over secp256k1
//! - Stateless HS256 bearer tokens

pub mod message;
pub mod signature;
pub mod token;

pub use message::*;
pub use signature::*;
pub use token::*;
