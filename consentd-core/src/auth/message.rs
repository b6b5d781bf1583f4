//! Canonical sign-in message construction
//!
//! Produces the fixed-layout text block a wallet signs. The server rebuilds
//! it from stored challenge fields on verification, so a client-supplied
//! message string is never trusted. Output must be byte-identical for
//! identical inputs: no locale-, timezone-, or iteration-order-dependent
//! formatting.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::{Address, NonceRecord};

/// Sign-in message protocol version
pub const MESSAGE_VERSION: &str = "1";

/// Structured fields of a sign-in message
#[derive(Debug, Clone)]
pub struct SignInFields<'a> {
    pub domain: &'a str,
    pub address: &'a Address,
    pub statement: &'a str,
    pub uri: &'a str,
    pub version: &'a str,
    pub chain_id: u64,
    pub nonce: &'a str,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignInFields<'_> {
    /// Build the line-oriented message text
    pub fn build(&self) -> String {
        let mut message = String::new();

        message.push_str(self.domain);
        message.push_str(" wants you to sign in with your account:\n");
        message.push_str(&self.address.to_checksum());
        message.push('\n');

        message.push('\n');
        message.push_str(self.statement.trim());
        message.push('\n');

        message.push('\n');
        message.push_str("URI: ");
        message.push_str(self.uri);
        message.push('\n');
        message.push_str("Version: ");
        message.push_str(self.version);
        message.push('\n');
        message.push_str("Chain ID: ");
        message.push_str(&self.chain_id.to_string());
        message.push('\n');
        message.push_str("Nonce: ");
        message.push_str(self.nonce);
        message.push('\n');
        message.push_str("Issued At: ");
        message.push_str(&format_timestamp(self.issued_at));
        message.push('\n');
        message.push_str("Expiration Time: ");
        message.push_str(&format_timestamp(self.expires_at));

        message
    }
}

/// Rebuild the message for a stored challenge record
pub fn message_for_record(record: &NonceRecord, address: &Address, statement: &str) -> String {
    SignInFields {
        domain: &record.domain,
        address,
        statement,
        uri: &record.uri,
        version: MESSAGE_VERSION,
        chain_id: record.chain_id,
        nonce: &record.nonce,
        issued_at: record.issued_at,
        expires_at: record.expires_at,
    }
    .build()
}

/// Fixed UTC RFC 3339 rendering with second precision and a trailing `Z`
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
