//! Wallet identity storage
//!
//! Identities are keyed by checksum address and created lazily: on first
//! successful wallet verification, and when a petition references an owner
//! or solicitor not seen before.

use chrono::Utc;
use fjall::{Keyspace, Partition, PersistMode};
use std::sync::{Arc, Mutex, MutexGuard};

use consentd_core::*;

/// Durable identity store keyed by checksum address
#[derive(Clone)]
pub struct IdentityStore {
    keyspace: Arc<Keyspace>,
    partition: Arc<Partition>,
    lock: Arc<Mutex<()>>,
}

impl IdentityStore {
    pub(crate) fn new(keyspace: Arc<Keyspace>, partition: Arc<Partition>) -> Self {
        IdentityStore {
            keyspace,
            partition,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get an identity, if known
    pub fn get(&self, address: &Address) -> Result<Option<Identity>> {
        let _guard = self.guard()?;
        self.get_locked(address)
    }

    /// Get or lazily create the identity for an address
    pub fn get_or_create(&self, address: &Address) -> Result<Identity> {
        let _guard = self.guard()?;

        if let Some(identity) = self.get_locked(address)? {
            return Ok(identity);
        }

        let identity = Identity {
            address: address.to_checksum(),
            created_at: Utc::now(),
        };

        let payload = serde_json::to_vec(&identity)?;
        self.partition
            .insert(identity.address.as_bytes(), payload)
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.persist()?;

        Ok(identity)
    }

    fn get_locked(&self, address: &Address) -> Result<Option<Identity>> {
        match self
            .partition
            .get(address.to_checksum().as_bytes())
            .map_err(|e| ConsentdError::Storage(e.to_string()))?
        {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| ConsentdError::Internal("identity store lock poisoned".to_string()))
    }

    fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| ConsentdError::Storage(e.to_string()))
    }
}
