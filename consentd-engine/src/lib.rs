//! Storage engine implementation using fjall

use fjall::{Config, Keyspace, PartitionCreateOptions, PersistMode};
use std::path::Path;
use std::sync::Arc;

use consentd_core::*;

pub mod consent_store;
pub mod identity_store;
pub mod nonce_store;

pub use consent_store::*;
pub use identity_store::*;
pub use nonce_store::*;

/// Default challenge TTL: 15 minutes
pub const DEFAULT_NONCE_TTL_SECS: u64 = 15 * 60;

/// Storage engine wrapping a fjall keyspace.
///
/// Opens each partition exactly once; store handles are cheap clones sharing
/// the partition and the per-store exclusion lock, so the atomicity
/// guarantees hold across every clone.
#[derive(Clone)]
pub struct StorageEngine {
    keyspace: Arc<Keyspace>,
    nonces: NonceStore,
    consents: ConsentStore,
    identities: IdentityStore,
}

impl StorageEngine {
    /// Create new storage engine at the given path with the default nonce TTL
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_nonce_ttl(path, DEFAULT_NONCE_TTL_SECS)
    }

    /// Create new storage engine with an explicit nonce TTL in seconds
    pub fn with_nonce_ttl(path: impl AsRef<Path>, nonce_ttl_secs: u64) -> Result<Self> {
        let keyspace = Arc::new(
            Config::new(path)
                .open()
                .map_err(|e| ConsentdError::Storage(e.to_string()))?,
        );

        let nonces_partition = open_partition(&keyspace, "nonces")?;
        let consents_partition = open_partition(&keyspace, "consents")?;
        let responses_partition = open_partition(&keyspace, "responses")?;
        let identities_partition = open_partition(&keyspace, "identities")?;

        Ok(StorageEngine {
            nonces: NonceStore::new(keyspace.clone(), nonces_partition, nonce_ttl_secs),
            consents: ConsentStore::new(keyspace.clone(), consents_partition, responses_partition),
            identities: IdentityStore::new(keyspace.clone(), identities_partition),
            keyspace,
        })
    }

    /// Create temporary storage engine for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir().map_err(|e| ConsentdError::Internal(e.to_string()))?;
        let engine = Self::new(temp_dir.path())?;
        Ok((engine, temp_dir))
    }

    /// Create temporary storage engine with an explicit nonce TTL
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp_with_nonce_ttl(nonce_ttl_secs: u64) -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir().map_err(|e| ConsentdError::Internal(e.to_string()))?;
        let engine = Self::with_nonce_ttl(temp_dir.path(), nonce_ttl_secs)?;
        Ok((engine, temp_dir))
    }

    /// Get the nonce store
    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }

    /// Get the consent store
    pub fn consents(&self) -> &ConsentStore {
        &self.consents
    }

    /// Get the identity store
    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    /// Persist all changes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| ConsentdError::Storage(e.to_string()))
    }
}

fn open_partition(keyspace: &Keyspace, name: &str) -> Result<Arc<fjall::Partition>> {
    let partition = keyspace
        .open_partition(name, PartitionCreateOptions::default())
        .map_err(|e| ConsentdError::Storage(e.to_string()))?;
    Ok(Arc::new(partition))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_engine_creation() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        assert_eq!(engine.nonces().ttl_secs(), DEFAULT_NONCE_TTL_SECS);
    }

    #[test]
    fn test_store_clones_share_state() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let address = Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();

        let issued = engine
            .nonces()
            .issue(&address, 1, "example.org", "https://example.org")
            .unwrap();

        // A clone of the engine sees the same record
        let clone = engine.clone();
        let fetched = clone.nonces().fetch(&address).unwrap();
        assert_eq!(fetched.nonce, issued.nonce);
    }
}
