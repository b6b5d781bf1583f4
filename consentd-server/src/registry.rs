//! Asset-registry collaborator
//!
//! Resolves the owning wallet of a registered asset. Constructed explicitly
//! and injected into the handlers; calls carry a per-request timeout and are
//! never retried internally, so failures surface to the caller.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use consentd_core::*;

/// The owning wallet of an asset and the chain it lives on
#[derive(Debug, Clone)]
pub struct AssetOwner {
    pub address: Address,
    pub chain_id: u64,
}

/// Lookup interface consumed when constructing a consent petition
#[async_trait]
pub trait AssetRegistry: Send + Sync {
    async fn resolve_owner(&self, asset: &AssetDid) -> Result<AssetOwner>;
}

/// HTTP client against the deployment's asset-registry cache
pub struct HttpAssetRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAssetRegistry {
    /// Create a client with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsentdError::Internal(format!("registry client init failed: {}", e)))?;

        Ok(HttpAssetRegistry {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AssetRegistry for HttpAssetRegistry {
    async fn resolve_owner(&self, asset: &AssetDid) -> Result<AssetOwner> {
        let url = format!("{}/api/registry/assets/ddo/{}", self.base_url, asset);

        let response = self.client.get(&url).send().await.map_err(|e| {
            ConsentdError::Internal(format!("asset registry request failed: {}", e))
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ConsentdError::NotFound(format!(
                "asset '{}' is not registered",
                asset
            )));
        }

        if !response.status().is_success() {
            return Err(ConsentdError::Internal(format!(
                "asset registry returned {} for '{}'",
                response.status(),
                asset
            )));
        }

        let ddo: serde_json::Value = response.json().await.map_err(|e| {
            ConsentdError::Internal(format!("asset registry returned invalid JSON: {}", e))
        })?;

        let owner = ddo
            .get("nft")
            .and_then(|nft| nft.get("owner"))
            .and_then(|owner| owner.as_str())
            .ok_or_else(|| {
                ConsentdError::Internal(format!("registry record for '{}' has no owner", asset))
            })?;

        let chain_id = ddo.get("chainId").and_then(|v| v.as_u64()).ok_or_else(|| {
            ConsentdError::Internal(format!("registry record for '{}' has no chain id", asset))
        })?;

        Ok(AssetOwner {
            address: Address::parse(owner)?,
            chain_id,
        })
    }
}

/// Fixed in-memory registry for tests and local development
#[derive(Debug, Default)]
pub struct StaticAssetRegistry {
    owners: HashMap<String, AssetOwner>,
}

impl StaticAssetRegistry {
    pub fn new() -> Self {
        StaticAssetRegistry::default()
    }

    /// Register an asset with its owner
    pub fn insert(&mut self, asset: &AssetDid, owner: AssetOwner) {
        self.owners.insert(asset.as_str().to_string(), owner);
    }
}

#[async_trait]
impl AssetRegistry for StaticAssetRegistry {
    async fn resolve_owner(&self, asset: &AssetDid) -> Result<AssetOwner> {
        self.owners
            .get(asset.as_str())
            .cloned()
            .ok_or_else(|| {
                ConsentdError::NotFound(format!("asset '{}' is not registered", asset))
            })
    }
}
