/// Remote vault transport - the wire contract the query engine speaks
use crate::error::{VaultError, VaultResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Opaque authenticated grant returned by a vault after the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub token: String,
    pub obtained_at: DateTime<Utc>,
}

/// Wire operations a vault exposes
///
/// Every call except the handshake pair requires a grant; the remote side
/// rejects expired grants, surfaced here as `Unauthorized`.
#[async_trait]
pub trait VaultTransport: Send + Sync {
    /// Ask the vault at `endpoint` for a signed challenge token
    async fn request_challenge(&self, endpoint: &str, instance_did: &str) -> VaultResult<String>;

    /// Exchange a signed response token for an access grant
    async fn authenticate(&self, endpoint: &str, response_token: &str) -> VaultResult<AccessGrant>;

    /// Run a named registered script with parameters
    async fn call_script(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        script_name: &str,
        params: &Value,
        target_did: &str,
        app_did: &str,
    ) -> VaultResult<Value>;

    /// Equality-filter fetch from a named collection
    async fn find_many(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        collection: &str,
        filter: &Value,
    ) -> VaultResult<Vec<Value>>;

    /// Insert one document into a named collection
    async fn insert_one(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        collection: &str,
        document: &Value,
    ) -> VaultResult<Value>;

    /// Update one document matching the filter
    async fn update_one(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> VaultResult<Value>;

    /// Delete one document matching the filter
    async fn delete_one(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        collection: &str,
        filter: &Value,
    ) -> VaultResult<()>;
}

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct FindManyResponse {
    #[serde(default)]
    items: Vec<Value>,
}

/// HTTP transport speaking the vault's JSON API
pub struct HttpVaultTransport {
    http_client: reqwest::Client,
}

impl HttpVaultTransport {
    pub fn new(timeout: Duration) -> VaultResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("boreal-vault/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { http_client })
    }

    /// Map a non-success response into the error taxonomy
    async fn check_status(response: reqwest::Response, what: &str) -> VaultResult<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(VaultError::Unauthorized);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VaultError::Remote(format!(
                "Vault returned error for {}: {} {}",
                what, status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl VaultTransport for HttpVaultTransport {
    async fn request_challenge(&self, endpoint: &str, instance_did: &str) -> VaultResult<String> {
        let url = format!("{}/api/v1/auth/challenge", endpoint);

        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "id": instance_did }))
            .send()
            .await?;

        let body: ChallengeResponse = Self::check_status(response, "challenge")
            .await?
            .json()
            .await?;

        Ok(body.challenge)
    }

    async fn authenticate(&self, endpoint: &str, response_token: &str) -> VaultResult<AccessGrant> {
        let url = format!("{}/api/v1/auth/token", endpoint);

        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "response": response_token }))
            .send()
            .await?;

        let body: TokenResponse = Self::check_status(response, "auth").await?.json().await?;

        Ok(AccessGrant {
            token: body.token,
            obtained_at: Utc::now(),
        })
    }

    async fn call_script(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        script_name: &str,
        params: &Value,
        target_did: &str,
        app_did: &str,
    ) -> VaultResult<Value> {
        let url = format!("{}/api/v1/scripting/{}", endpoint, script_name);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&grant.token)
            .json(&serde_json::json!({
                "params": params,
                "context": {
                    "target_did": target_did,
                    "app_did": app_did,
                }
            }))
            .send()
            .await?;

        let body: Value = Self::check_status(response, script_name).await?.json().await?;
        Ok(body)
    }

    async fn find_many(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        collection: &str,
        filter: &Value,
    ) -> VaultResult<Vec<Value>> {
        let url = format!("{}/api/v1/db/query", endpoint);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&grant.token)
            .json(&serde_json::json!({
                "collection": collection,
                "filter": filter,
            }))
            .send()
            .await?;

        let body: FindManyResponse = Self::check_status(response, collection)
            .await?
            .json()
            .await?;

        Ok(body.items)
    }

    async fn insert_one(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        collection: &str,
        document: &Value,
    ) -> VaultResult<Value> {
        let url = format!("{}/api/v1/db/{}", endpoint, collection);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&grant.token)
            .json(&serde_json::json!({ "document": document }))
            .send()
            .await?;

        let body: Value = Self::check_status(response, collection).await?.json().await?;
        Ok(body)
    }

    async fn update_one(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> VaultResult<Value> {
        let url = format!("{}/api/v1/db/{}", endpoint, collection);

        let response = self
            .http_client
            .patch(&url)
            .bearer_auth(&grant.token)
            .json(&serde_json::json!({
                "filter": filter,
                "update": update,
            }))
            .send()
            .await?;

        let body: Value = Self::check_status(response, collection).await?.json().await?;
        Ok(body)
    }

    async fn delete_one(
        &self,
        endpoint: &str,
        grant: &AccessGrant,
        collection: &str,
        filter: &Value,
    ) -> VaultResult<()> {
        let url = format!("{}/api/v1/db/{}", endpoint, collection);

        let response = self
            .http_client
            .delete(&url)
            .bearer_auth(&grant.token)
            .json(&serde_json::json!({ "filter": filter }))
            .send()
            .await?;

        Self::check_status(response, collection).await?;
        Ok(())
    }
}
