/// Verifiable credentials, presentations, and the application credential issuer
use crate::{
    error::{VaultError, VaultResult},
    token::InstanceKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k256::ecdsa::{signature::Verifier, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const PROOF_TYPE: &str = "EcdsaSecp256k1Signature2019";

/// A signed claim set about a subject identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub issuer: String,
    pub subject: String,
    pub issuance_date: DateTime<Utc>,
    /// Named claim properties (e.g. display name)
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

/// A signed bundle of credentials addressed to one verifier
///
/// Bound to a single-use nonce; never reused across handshakes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub id: String,
    pub holder: String,
    pub credentials: Vec<Credential>,
    /// The recipient realm this presentation is addressed to
    pub realm: String,
    pub nonce: String,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

/// Signature proof attached to credentials and presentations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub verification_method: String,
    pub signature_hex: String,
}

/// One requested claim in a user-credential request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub description: String,
    pub name: String,
    pub required: bool,
}

impl ClaimRequest {
    pub fn simple(description: impl Into<String>, name: impl Into<String>, required: bool) -> Self {
        Self {
            description: description.into(),
            name: name.into(),
            required,
        }
    }
}

/// External connector capable of producing credentials for this application
///
/// The wallet/browser side of this contract is out of scope; callers supply
/// an implementation, tests supply in-memory doubles.
#[async_trait]
pub trait CredentialConnector: Send + Sync {
    /// Return the previously issued application-identity credential, if any
    async fn existing_app_credential(&self) -> VaultResult<Option<Credential>>;

    /// Issue a fresh application-identity credential
    async fn issue_app_credential(&self) -> VaultResult<Credential>;

    /// Request a presentation of user credentials carrying the named claims
    async fn request_user_credentials(&self, claims: &[ClaimRequest]) -> VaultResult<Presentation>;
}

/// Produces and caches the application credential; builds signed presentations
pub struct CredentialIssuer {
    instance_did: String,
    instance_key: Arc<InstanceKey>,
    connector: Arc<dyn CredentialConnector>,
    cached: RwLock<Option<Credential>>,
}

impl CredentialIssuer {
    pub fn new(
        instance_did: String,
        instance_key: Arc<InstanceKey>,
        connector: Arc<dyn CredentialConnector>,
    ) -> Self {
        Self {
            instance_did,
            instance_key,
            connector,
            cached: RwLock::new(None),
        }
    }

    /// Get the application credential, requesting one from the connector on
    /// first use and caching it for the process lifetime
    pub async fn get_or_create_app_credential(&self) -> VaultResult<Credential> {
        {
            let cached = self.cached.read().await;
            if let Some(credential) = cached.as_ref() {
                return Ok(credential.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another caller may have filled the cache while we waited
        if let Some(credential) = cached.as_ref() {
            return Ok(credential.clone());
        }

        let existing = self
            .connector
            .existing_app_credential()
            .await
            .map_err(|e| VaultError::CredentialUnavailable(e.to_string()))?;

        let credential = match existing {
            Some(credential) => credential,
            None => {
                tracing::debug!("No application credential on record, requesting issuance");
                self.connector
                    .issue_app_credential()
                    .await
                    .map_err(|e| VaultError::CredentialUnavailable(e.to_string()))?
            }
        };

        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Drop the cached credential so the next call re-requests one
    pub async fn refresh_app_credential(&self) {
        *self.cached.write().await = None;
    }

    /// Build a fresh signed presentation bound to the given realm and nonce
    ///
    /// Never cached: the nonce differs per handshake, so each call produces a
    /// new presentation even for identical inputs.
    pub fn build_presentation(
        &self,
        credential: &Credential,
        realm: &str,
        nonce: &str,
    ) -> VaultResult<Presentation> {
        let mut presentation = Presentation {
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            holder: self.instance_did.clone(),
            credentials: vec![credential.clone()],
            realm: realm.to_string(),
            nonce: nonce.to_string(),
            created: Utc::now(),
            proof: None,
        };

        let canonical = presentation_signing_bytes(&presentation)?;
        let signature: Signature = self.instance_key.sign(&canonical);

        presentation.proof = Some(Proof {
            proof_type: PROOF_TYPE.to_string(),
            verification_method: format!("{}#primary", self.instance_did),
            signature_hex: hex::encode(signature.to_bytes()),
        });

        Ok(presentation)
    }
}

/// Verify a presentation's proof against the holder's verifying key
pub fn verify_presentation(
    presentation: &Presentation,
    key: &k256::ecdsa::VerifyingKey,
) -> VaultResult<()> {
    let proof = presentation
        .proof
        .as_ref()
        .ok_or_else(|| VaultError::InvalidChallenge("Presentation is unsigned".to_string()))?;

    let signature_bytes = hex::decode(&proof.signature_hex).map_err(|e| {
        VaultError::InvalidChallenge(format!("Invalid presentation signature encoding: {}", e))
    })?;
    let signature = Signature::from_slice(&signature_bytes).map_err(|e| {
        VaultError::InvalidChallenge(format!("Invalid presentation signature: {}", e))
    })?;

    let canonical = presentation_signing_bytes(presentation)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let digest = hasher.finalize();

    key.verify(&digest, &signature).map_err(|_| {
        VaultError::InvalidChallenge("Presentation signature verification failed".to_string())
    })
}

/// Canonical presentation body used as signing input, proof excluded
fn presentation_signing_bytes(presentation: &Presentation) -> VaultResult<Vec<u8>> {
    let mut unsigned = presentation.clone();
    unsigned.proof = None;

    serde_json::to_vec(&unsigned)
        .map_err(|e| VaultError::SigningFailed(format!("Failed to serialize presentation: {}", e)))
}
