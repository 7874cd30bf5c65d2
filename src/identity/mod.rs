/// Decentralized identity: DID documents, resolution, and the resolver cache
pub mod cache;
pub mod resolver;

pub use cache::DidCache;
pub use resolver::{DidResolver, HttpDidResolver};

use chrono::{DateTime, Utc};
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

/// Service type advertised by personal data vaults in DID documents
pub const VAULT_SERVICE_TYPE: &str = "PersonalDataVault";

/// A resolved DID document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    pub id: String,
    #[serde(default)]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub service: Vec<ServiceEntry>,
}

/// A verification method (public key) entry in a DID document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_hex: Option<String>,
}

/// A service endpoint entry in a DID document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
}

/// A cached DID document row
#[derive(Debug, Clone)]
pub struct CachedDidDoc {
    pub did: String,
    pub doc: String,
    pub cached_at: DateTime<Utc>,
}

/// Extract the personal data vault endpoint from a DID document
pub fn vault_service_endpoint(doc: &DidDocument) -> Option<String> {
    doc.service
        .iter()
        .find(|entry| entry.service_type == VAULT_SERVICE_TYPE)
        .map(|entry| entry.service_endpoint.clone())
}

/// Extract the first usable secp256k1 verification key from a DID document
///
/// Keys are carried as hex-encoded compressed SEC1 points.
pub fn signing_key(doc: &DidDocument) -> Option<VerifyingKey> {
    doc.verification_method
        .iter()
        .filter_map(|method| method.public_key_hex.as_deref())
        .filter_map(|key_hex| hex::decode(key_hex).ok())
        .find_map(|bytes| VerifyingKey::from_sec1_bytes(&bytes).ok())
}
