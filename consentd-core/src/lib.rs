//! Core domain logic for consentd

pub mod auth;
pub mod capability;
pub mod error;
pub mod flags;
pub mod negotiation;
pub mod types;

pub use error::*;
pub use types::*;

/// Result type alias for consentd operations
pub type Result<T> = std::result::Result<T, ConsentdError>;
