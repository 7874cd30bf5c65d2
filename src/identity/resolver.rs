/// DID resolver - fetches identity documents from the network resolver with caching
use crate::{
    error::{VaultError, VaultResult},
    identity::{DidCache, DidDocument},
};
use async_trait::async_trait;
use std::time::Duration;

/// Capability of resolving a DID into a signed identity document
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Resolve a method-specific identifier into its DID document
    async fn resolve_did(&self, did: &str) -> VaultResult<DidDocument>;
}

/// HTTP resolver against the configured network endpoint, with an on-disk cache
pub struct HttpDidResolver {
    cache: DidCache,
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpDidResolver {
    /// Create a resolver for the given resolver endpoint
    pub fn new(cache: DidCache, endpoint: impl Into<String>, timeout: Duration) -> VaultResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("boreal-vault/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            cache,
            http_client,
            endpoint: endpoint.into(),
        })
    }

    /// Fetch a DID document from the resolver endpoint
    async fn fetch_document(&self, did: &str) -> VaultResult<DidDocument> {
        let url = format!("{}/1.0/identifiers/{}", self.endpoint, did);

        let response = self.http_client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VaultError::DidNotFound(did.to_string()));
        }

        if !response.status().is_success() {
            return Err(VaultError::Remote(format!(
                "Resolver returned error for {}: {}",
                did,
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;

        // Resolution responses wrap the document; bare documents are accepted too
        let doc_value = body.get("didDocument").cloned().unwrap_or(body);
        let doc: DidDocument = serde_json::from_value(doc_value)
            .map_err(|e| VaultError::Remote(format!("Invalid DID document for {}: {}", did, e)))?;

        Ok(doc)
    }
}

#[async_trait]
impl DidResolver for HttpDidResolver {
    async fn resolve_did(&self, did: &str) -> VaultResult<DidDocument> {
        // Check cache first
        if let Some(cached) = self.cache.get(did).await? {
            let doc: DidDocument = serde_json::from_str(&cached.doc)
                .map_err(|e| VaultError::Config(format!("Invalid cached DID document: {}", e)))?;
            return Ok(doc);
        }

        tracing::debug!("Resolving DID {} via {}", did, self.endpoint);
        let doc = self.fetch_document(did).await?;

        let doc_json = serde_json::to_string(&doc)
            .map_err(|e| VaultError::Config(format!("Failed to serialize DID document: {}", e)))?;
        self.cache.put(did, &doc_json).await?;

        Ok(doc)
    }
}
