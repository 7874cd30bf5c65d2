/// Shared in-memory vault double for engine-level tests
use crate::{
    challenge::ChallengeResponder,
    credential::{ClaimRequest, Credential, CredentialConnector, CredentialIssuer, Presentation},
    error::{VaultError, VaultResult},
    identity::{DidDocument, DidResolver, ServiceEntry, VerificationMethod, VAULT_SERVICE_TYPE},
    query::QueryEngine,
    session::SessionCache,
    token::{self, InstanceKey, TokenClaims},
    transport::{AccessGrant, VaultTransport},
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory vault: answers the handshake with its own key and serves
/// records from per-name stores, applying equality filters like the real
/// database service does
pub(crate) struct TestVault {
    pub(crate) vault_key: InstanceKey,
    vault_did: String,
    records: Mutex<HashMap<String, Vec<Value>>>,
    pub(crate) challenges: AtomicUsize,
    pub(crate) reject_grants: AtomicBool,
    pub(crate) last_script_params: Mutex<Option<(String, Value)>>,
}

impl TestVault {
    pub(crate) fn new(vault_did: &str) -> Self {
        Self {
            vault_key: InstanceKey::new(&[5u8; 32]).expect("static key"),
            vault_did: vault_did.to_string(),
            records: Mutex::new(HashMap::new()),
            challenges: AtomicUsize::new(0),
            reject_grants: AtomicBool::new(false),
            last_script_params: Mutex::new(None),
        }
    }

    /// Seed records served for a script or collection name
    pub(crate) async fn seed(&self, name: &str, records: Vec<Value>) {
        self.records.lock().await.insert(name.to_string(), records);
    }

    pub(crate) async fn stored(&self, name: &str) -> Vec<Value> {
        self.records
            .lock()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn matches(record: &Value, filter: &Value) -> bool {
        match filter.as_object() {
            Some(fields) => fields
                .iter()
                .all(|(key, expected)| record.get(key) == Some(expected)),
            None => true,
        }
    }

    fn check_grant(&self) -> VaultResult<()> {
        if self.reject_grants.load(Ordering::SeqCst) {
            return Err(VaultError::Unauthorized);
        }
        Ok(())
    }
}

#[async_trait]
impl VaultTransport for TestVault {
    async fn request_challenge(&self, _endpoint: &str, _instance_did: &str) -> VaultResult<String> {
        let count = self.challenges.fetch_add(1, Ordering::SeqCst);
        let claims = TokenClaims {
            iss: self.vault_did.clone(),
            sub: Some("didauth".to_string()),
            aud: None,
            nonce: Some(format!("nonce-{}", count)),
            iat: Utc::now().timestamp(),
            exp: Some(Utc::now().timestamp() + 600),
            payload: Value::Null,
        };
        token::sign_token(&claims, &self.vault_key)
    }

    async fn authenticate(&self, _endpoint: &str, _response_token: &str) -> VaultResult<AccessGrant> {
        Ok(AccessGrant {
            token: "grant-token".to_string(),
            obtained_at: Utc::now(),
        })
    }

    async fn call_script(
        &self,
        _endpoint: &str,
        _grant: &AccessGrant,
        script_name: &str,
        params: &Value,
        _target_did: &str,
        _app_did: &str,
    ) -> VaultResult<Value> {
        self.check_grant()?;
        *self.last_script_params.lock().await = Some((script_name.to_string(), params.clone()));

        let records = self.stored(script_name).await;
        Ok(serde_json::json!({
            "find_message": { "items": records }
        }))
    }

    async fn find_many(
        &self,
        _endpoint: &str,
        _grant: &AccessGrant,
        collection: &str,
        filter: &Value,
    ) -> VaultResult<Vec<Value>> {
        self.check_grant()?;
        let records = self.stored(collection).await;
        Ok(records
            .into_iter()
            .filter(|record| Self::matches(record, filter))
            .collect())
    }

    async fn insert_one(
        &self,
        _endpoint: &str,
        _grant: &AccessGrant,
        collection: &str,
        document: &Value,
    ) -> VaultResult<Value> {
        self.check_grant()?;
        self.records
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(document.clone());
        Ok(serde_json::json!({ "acknowledged": true }))
    }

    async fn update_one(
        &self,
        _endpoint: &str,
        _grant: &AccessGrant,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> VaultResult<Value> {
        self.check_grant()?;
        let mut records = self.records.lock().await;
        if let Some(rows) = records.get_mut(collection) {
            if let Some(row) = rows.iter_mut().find(|row| Self::matches(row, filter)) {
                if let (Some(target), Some(changes)) = (row.as_object_mut(), update.as_object()) {
                    for (key, value) in changes {
                        target.insert(key.clone(), value.clone());
                    }
                }
                return Ok(serde_json::json!({ "matched": 1 }));
            }
        }
        Ok(serde_json::json!({ "matched": 0 }))
    }

    async fn delete_one(
        &self,
        _endpoint: &str,
        _grant: &AccessGrant,
        collection: &str,
        filter: &Value,
    ) -> VaultResult<()> {
        self.check_grant()?;
        let mut records = self.records.lock().await;
        if let Some(rows) = records.get_mut(collection) {
            if let Some(position) = rows.iter().position(|row| Self::matches(row, filter)) {
                rows.remove(position);
            }
        }
        Ok(())
    }
}

/// Resolver that vouches the test vault's key for every target
struct TestResolver {
    vault_key_hex: String,
}

#[async_trait]
impl DidResolver for TestResolver {
    async fn resolve_did(&self, did: &str) -> VaultResult<DidDocument> {
        Ok(DidDocument {
            id: did.to_string(),
            also_known_as: vec![],
            verification_method: vec![VerificationMethod {
                id: format!("{}#primary", did),
                method_type: "EcdsaSecp256k1VerificationKey2019".to_string(),
                controller: did.to_string(),
                public_key_hex: Some(self.vault_key_hex.clone()),
            }],
            service: vec![ServiceEntry {
                id: format!("{}#vault", did),
                service_type: VAULT_SERVICE_TYPE.to_string(),
                service_endpoint: format!("https://vault.example.com/{}", did),
            }],
        })
    }
}

struct TestConnector;

#[async_trait]
impl CredentialConnector for TestConnector {
    async fn existing_app_credential(&self) -> VaultResult<Option<Credential>> {
        Ok(Some(Credential {
            id: "urn:uuid:44444444-4444-4444-4444-444444444444".to_string(),
            issuer: "did:boreal:app".to_string(),
            subject: "did:key:zinstance".to_string(),
            issuance_date: Utc::now(),
            properties: serde_json::Map::new(),
            proof: None,
        }))
    }

    async fn issue_app_credential(&self) -> VaultResult<Credential> {
        Err(VaultError::CredentialUnavailable("not expected".to_string()))
    }

    async fn request_user_credentials(
        &self,
        _claims: &[ClaimRequest],
    ) -> VaultResult<Presentation> {
        Err(VaultError::CredentialUnavailable("not expected".to_string()))
    }
}

/// Wire a query engine against an in-memory vault
pub(crate) fn engine_with_vault(vault_did: &str) -> (Arc<QueryEngine>, Arc<TestVault>) {
    let vault = Arc::new(TestVault::new(vault_did));
    let instance_key = Arc::new(InstanceKey::new(&[8u8; 32]).expect("static key"));
    let resolver = Arc::new(TestResolver {
        vault_key_hex: vault.vault_key.public_key_hex(),
    });
    let issuer = Arc::new(CredentialIssuer::new(
        instance_key.instance_did(),
        instance_key.clone(),
        Arc::new(TestConnector),
    ));
    let responder = Arc::new(ChallengeResponder::new(
        resolver.clone(),
        issuer,
        instance_key.clone(),
    ));
    let sessions = Arc::new(SessionCache::new(
        resolver,
        responder,
        vault.clone(),
        instance_key.instance_did(),
    ));
    let engine = Arc::new(QueryEngine::new(
        sessions,
        vault.clone(),
        "did:boreal:app".to_string(),
    ));
    (engine, vault)
}
