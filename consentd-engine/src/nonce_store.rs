//! One-challenge-per-address nonce lifecycle
//!
//! A single live record per wallet address, superseded atomically by every
//! new challenge and deleted exactly once on successful verification. A
//! failed verification leaves the record intact so the legitimate holder can
//! retry until expiry.

use chrono::{Duration, Utc};
use fjall::{Keyspace, Partition, PersistMode};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::{Arc, Mutex, MutexGuard};

use consentd_core::*;

/// Durable nonce store keyed by checksum address
#[derive(Clone)]
pub struct NonceStore {
    keyspace: Arc<Keyspace>,
    partition: Arc<Partition>,
    lock: Arc<Mutex<()>>,
    ttl_secs: u64,
}

impl NonceStore {
    pub(crate) fn new(keyspace: Arc<Keyspace>, partition: Arc<Partition>, ttl_secs: u64) -> Self {
        NonceStore {
            keyspace,
            partition,
            lock: Arc::new(Mutex::new(())),
            ttl_secs,
        }
    }

    /// Configured challenge TTL in seconds
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Issue a fresh challenge for the address, superseding any outstanding
    /// record. The upsert runs under the store lock so two simultaneous
    /// requests never leave two live records.
    pub fn issue(
        &self,
        address: &Address,
        chain_id: u64,
        domain: &str,
        uri: &str,
    ) -> Result<NonceRecord> {
        let issued_at = Utc::now();
        let record = NonceRecord {
            address: address.to_checksum(),
            nonce: generate_nonce(),
            chain_id,
            domain: domain.to_string(),
            uri: uri.to_string(),
            issued_at,
            expires_at: issued_at + Duration::seconds(self.ttl_secs as i64),
        };

        let payload = serde_json::to_vec(&record)?;

        let _guard = self.guard()?;
        self.partition
            .insert(record.address.as_bytes(), payload)
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.persist()?;

        Ok(record)
    }

    /// Fetch the live record for an address without consuming it.
    ///
    /// A record past its TTL is deleted as a side effect and reported as
    /// expired; the caller must request a fresh challenge.
    pub fn fetch(&self, address: &Address) -> Result<NonceRecord> {
        let _guard = self.guard()?;
        self.fetch_locked(address)
    }

    /// Delete the record after a successful signature match.
    ///
    /// The check-then-delete runs under the store lock, so of two concurrent
    /// verifications carrying the same valid signature only one can consume.
    pub fn consume(&self, address: &Address) -> Result<()> {
        let key = address.to_checksum();

        let _guard = self.guard()?;
        let existing = self
            .partition
            .get(key.as_bytes())
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;

        if existing.is_none() {
            return Err(ConsentdError::NotFound(format!(
                "no pending challenge for {}",
                key
            )));
        }

        self.partition
            .remove(key.as_bytes())
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.persist()
    }

    fn fetch_locked(&self, address: &Address) -> Result<NonceRecord> {
        let key = address.to_checksum();

        let data = self
            .partition
            .get(key.as_bytes())
            .map_err(|e| ConsentdError::Storage(e.to_string()))?
            .ok_or_else(|| {
                ConsentdError::NotFound(format!("no pending challenge for {}", key))
            })?;

        let record: NonceRecord = serde_json::from_slice(&data)?;

        if record.is_expired(Utc::now()) {
            // Lazy cleanup: drop the stale record on detection
            self.partition
                .remove(key.as_bytes())
                .map_err(|e| ConsentdError::Storage(e.to_string()))?;
            self.persist()?;
            return Err(ConsentdError::Expired(key));
        }

        Ok(record)
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| ConsentdError::Internal("nonce store lock poisoned".to_string()))
    }

    fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| ConsentdError::Storage(e.to_string()))
    }
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageEngine;

    fn test_address() -> Address {
        Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap()
    }

    #[test]
    fn test_issue_and_fetch() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let address = test_address();

        let issued = engine
            .nonces()
            .issue(&address, 32456, "example.org", "https://example.org")
            .unwrap();
        assert_eq!(issued.address, address.to_checksum());
        assert_eq!(issued.nonce.len(), 64);

        // Fetch does not consume
        let fetched = engine.nonces().fetch(&address).unwrap();
        assert_eq!(fetched.nonce, issued.nonce);
        let again = engine.nonces().fetch(&address).unwrap();
        assert_eq!(again.nonce, issued.nonce);
    }

    #[test]
    fn test_fetch_unknown_address_is_not_found() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let err = engine.nonces().fetch(&test_address()).unwrap_err();
        assert!(matches!(err, ConsentdError::NotFound(_)));
    }

    #[test]
    fn test_new_challenge_supersedes_old() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let address = test_address();

        let first = engine
            .nonces()
            .issue(&address, 1, "example.org", "https://example.org")
            .unwrap();
        let second = engine
            .nonces()
            .issue(&address, 1, "example.org", "https://example.org")
            .unwrap();
        assert_ne!(first.nonce, second.nonce);

        // Only the second record is live now
        let fetched = engine.nonces().fetch(&address).unwrap();
        assert_eq!(fetched.nonce, second.nonce);
    }

    #[test]
    fn test_consume_is_one_time() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let address = test_address();

        engine
            .nonces()
            .issue(&address, 1, "example.org", "https://example.org")
            .unwrap();

        engine.nonces().consume(&address).unwrap();

        // Second consume and subsequent fetch both fail
        assert!(matches!(
            engine.nonces().consume(&address).unwrap_err(),
            ConsentdError::NotFound(_)
        ));
        assert!(matches!(
            engine.nonces().fetch(&address).unwrap_err(),
            ConsentdError::NotFound(_)
        ));
    }

    #[test]
    fn test_expired_record_is_deleted_on_fetch() {
        let (engine, _temp) = StorageEngine::temp_with_nonce_ttl(0).unwrap();
        let address = test_address();

        engine
            .nonces()
            .issue(&address, 1, "example.org", "https://example.org")
            .unwrap();

        // TTL of zero expires immediately; detection deletes the record
        let err = engine.nonces().fetch(&address).unwrap_err();
        assert!(matches!(err, ConsentdError::Expired(_)));

        let err = engine.nonces().fetch(&address).unwrap_err();
        assert!(matches!(err, ConsentdError::NotFound(_)));
    }

    #[test]
    fn test_fresh_challenge_after_expiry() {
        let (engine, _temp) = StorageEngine::temp_with_nonce_ttl(0).unwrap();
        let address = test_address();

        engine
            .nonces()
            .issue(&address, 1, "example.org", "https://example.org")
            .unwrap();
        let _ = engine.nonces().fetch(&address);

        // A new challenge can always be issued
        let record = engine
            .nonces()
            .issue(&address, 1, "example.org", "https://example.org")
            .unwrap();
        assert!(!record.nonce.is_empty());
    }
}
