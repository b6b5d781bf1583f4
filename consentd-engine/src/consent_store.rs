//! Consent petition and response storage
//!
//! Petitions are immutable once created; each has at most one response,
//! enforced by an atomic exists-check-validate-insert under the store lock.
//! Status is derived on read from (request, permitted) and never persisted.

use chrono::Utc;
use fjall::{Keyspace, Partition, PersistMode};
use std::sync::{Arc, Mutex, MutexGuard};

use consentd_core::flags::PermissionMask;
use consentd_core::negotiation;
use consentd_core::*;

/// Input for creating a consent petition
#[derive(Debug, Clone)]
pub struct NewConsent {
    pub dataset: AssetDid,
    pub dataset_owner: Address,
    pub algorithm: AssetDid,
    pub algorithm_owner: Address,
    pub solicitor: Address,
    pub request: PermissionMask,
    pub reason: String,
}

/// Durable consent store over two partitions: petitions and responses
#[derive(Clone)]
pub struct ConsentStore {
    keyspace: Arc<Keyspace>,
    consents: Arc<Partition>,
    responses: Arc<Partition>,
    lock: Arc<Mutex<()>>,
}

impl ConsentStore {
    pub(crate) fn new(
        keyspace: Arc<Keyspace>,
        consents: Arc<Partition>,
        responses: Arc<Partition>,
    ) -> Self {
        ConsentStore {
            keyspace,
            consents,
            responses,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a consent petition, or return the outstanding one for the same
    /// (dataset, algorithm, solicitor) triple.
    pub fn create(&self, new: NewConsent) -> Result<Consent> {
        let pair_key = pair_key(&new.dataset, &new.algorithm, &new.solicitor);

        let _guard = self.guard()?;

        if let Some(existing) = self
            .consents
            .get(&pair_key)
            .map_err(|e| ConsentdError::Storage(e.to_string()))?
        {
            let id = String::from_utf8_lossy(&existing).to_string();
            return self.get_locked(ConsentId::parse(&id)?);
        }

        let consent = Consent {
            id: ConsentId::new(),
            dataset: new.dataset,
            dataset_owner: new.dataset_owner,
            algorithm: new.algorithm,
            algorithm_owner: new.algorithm_owner,
            solicitor: new.solicitor,
            request: new.request,
            reason: new.reason,
            created_at: Utc::now(),
        };

        let payload = serde_json::to_vec(&consent)?;
        self.consents
            .insert(consent_key(consent.id), payload)
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.consents
            .insert(&pair_key, consent.id.to_string().as_bytes())
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.persist()?;

        Ok(consent)
    }

    /// Get a consent petition by id
    pub fn get(&self, id: ConsentId) -> Result<Consent> {
        let _guard = self.guard()?;
        self.get_locked(id)
    }

    /// Get the response to a petition, if any
    pub fn response(&self, id: ConsentId) -> Result<Option<ConsentResponse>> {
        let _guard = self.guard()?;
        self.response_locked(id)
    }

    /// Derive the current status of a petition
    pub fn status(&self, consent: &Consent) -> Result<ConsentStatus> {
        match self.response(consent.id)? {
            Some(response) => Ok(negotiation::derive_status(consent.request, response.permitted)),
            None => Ok(ConsentStatus::Pending),
        }
    }

    /// Answer a petition. Exactly one response per petition ever succeeds:
    /// exists-check, subset validation, and insert are one atomic unit.
    pub fn respond(
        &self,
        id: ConsentId,
        permitted: PermissionMask,
        reason: String,
    ) -> Result<ConsentResponse> {
        let _guard = self.guard()?;

        let consent = self.get_locked(id)?;

        if self.response_locked(id)?.is_some() {
            return Err(ConsentdError::Conflict(format!(
                "consent petition '{}' is already answered",
                id
            )));
        }

        negotiation::evaluate_response(consent.request, permitted)?;

        let response = ConsentResponse {
            consent: id,
            permitted,
            reason,
            responded_at: Utc::now(),
        };

        let payload = serde_json::to_vec(&response)?;
        self.responses
            .insert(response_key(id), payload)
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.persist()?;

        Ok(response)
    }

    /// Remove the response to a petition, reverting it to pending
    pub fn retract(&self, id: ConsentId) -> Result<()> {
        let _guard = self.guard()?;

        self.get_locked(id)?;

        if self.response_locked(id)?.is_none() {
            return Err(ConsentdError::NotFound(format!(
                "no response recorded for consent petition '{}'",
                id
            )));
        }

        self.responses
            .remove(response_key(id))
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.persist()
    }

    /// Delete an unanswered petition
    pub fn delete(&self, id: ConsentId) -> Result<()> {
        let _guard = self.guard()?;

        let consent = self.get_locked(id)?;

        if self.response_locked(id)?.is_some() {
            return Err(ConsentdError::Conflict(format!(
                "consent petition '{}' is already answered and cannot be deleted",
                id
            )));
        }

        self.consents
            .remove(consent_key(id))
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.consents
            .remove(pair_key(&consent.dataset, &consent.algorithm, &consent.solicitor))
            .map_err(|e| ConsentdError::Storage(e.to_string()))?;
        self.persist()
    }

    fn get_locked(&self, id: ConsentId) -> Result<Consent> {
        let data = self
            .consents
            .get(consent_key(id))
            .map_err(|e| ConsentdError::Storage(e.to_string()))?
            .ok_or_else(|| {
                ConsentdError::NotFound(format!("unknown consent petition '{}'", id))
            })?;

        Ok(serde_json::from_slice(&data)?)
    }

    fn response_locked(&self, id: ConsentId) -> Result<Option<ConsentResponse>> {
        match self
            .responses
            .get(response_key(id))
            .map_err(|e| ConsentdError::Storage(e.to_string()))?
        {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| ConsentdError::Internal("consent store lock poisoned".to_string()))
    }

    fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| ConsentdError::Storage(e.to_string()))
    }
}

// Key formatting helpers

fn consent_key(id: ConsentId) -> Vec<u8> {
    format!("consent:{}", id).into_bytes()
}

fn pair_key(dataset: &AssetDid, algorithm: &AssetDid, solicitor: &Address) -> Vec<u8> {
    format!(
        "pair:{}|{}|{}",
        dataset.as_str(),
        algorithm.as_str(),
        solicitor.to_checksum()
    )
    .into_bytes()
}

fn response_key(id: ConsentId) -> Vec<u8> {
    id.to_string().into_bytes()
}
