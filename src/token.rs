/// Compact signed tokens for the authentication handshake
///
/// Challenge and response tokens are JWT-shaped: three base64url segments
/// (header, claims, signature), signed with secp256k1 over a SHA-256 digest
/// of the signing input.
use crate::error::{VaultError, VaultResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use k256::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const TOKEN_TYPE: &str = "JWT";
const TOKEN_ALGORITHM: &str = "ES256K";
const TOKEN_VERSION: &str = "1.0";

/// Clock skew tolerated when checking token expiry, in seconds
const EXPIRY_LEEWAY_SECS: i64 = 300;

/// Token header segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHeader {
    pub typ: String,
    pub alg: String,
    pub version: String,
}

impl Default for TokenHeader {
    fn default() -> Self {
        Self {
            typ: TOKEN_TYPE.to_string(),
            alg: TOKEN_ALGORITHM.to_string(),
            version: TOKEN_VERSION.to_string(),
        }
    }
}

/// Token claims segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer identity
    pub iss: String,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Single-use nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Issued-at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Free-form payload (e.g. an embedded presentation)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

/// The local application-instance signing key (secp256k1)
pub struct InstanceKey {
    signing_key: SigningKey,
}

impl InstanceKey {
    /// Create an instance key from a raw private key (32 bytes)
    pub fn new(private_key: &[u8]) -> VaultResult<Self> {
        if private_key.len() != 32 {
            return Err(VaultError::SigningFailed(
                "Private key must be exactly 32 bytes".to_string(),
            ));
        }

        let secret_key = SecretKey::from_slice(private_key)
            .map_err(|e| VaultError::SigningFailed(format!("Invalid private key: {}", e)))?;

        Ok(Self {
            signing_key: SigningKey::from(secret_key),
        })
    }

    /// Create an instance key from a hex-encoded private key
    pub fn from_hex(hex_key: &str) -> VaultResult<Self> {
        let key_bytes = hex::decode(hex_key.trim())
            .map_err(|e| VaultError::SigningFailed(format!("Invalid hex private key: {}", e)))?;

        Self::new(&key_bytes)
    }

    /// Generate a fresh random instance key
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Hex-encode the private key for persistence
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Get the public key in compressed form (33 bytes, hex-encoded)
    pub fn public_key_hex(&self) -> String {
        let verifying_key = self.signing_key.verifying_key();
        hex::encode(verifying_key.to_encoded_point(true).as_bytes())
    }

    /// Derive the instance DID from the public key
    pub fn instance_did(&self) -> String {
        format!("did:key:z{}", self.public_key_hex())
    }

    /// Get the verifying key (public key)
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// Sign a SHA-256 digest of the given bytes
    pub fn sign(&self, data: &[u8]) -> Signature {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hasher.finalize();

        self.signing_key.sign(&digest)
    }
}

/// Encode and sign a token with the given claims
pub fn sign_token(claims: &TokenClaims, key: &InstanceKey) -> VaultResult<String> {
    let header = TokenHeader::default();

    let header_json = serde_json::to_vec(&header)
        .map_err(|e| VaultError::SigningFailed(format!("Failed to encode header: {}", e)))?;
    let claims_json = serde_json::to_vec(claims)
        .map_err(|e| VaultError::SigningFailed(format!("Failed to encode claims: {}", e)))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let signature = key.sign(signing_input.as_bytes());
    let signature_segment = URL_SAFE_NO_PAD.encode(signature.to_bytes());

    Ok(format!("{}.{}", signing_input, signature_segment))
}

/// Decode the claims segment without verifying the signature
///
/// Used to learn the claimed issuer before its verification key is resolved.
pub fn decode_claims(token: &str) -> VaultResult<TokenClaims> {
    let (_, claims, _) = split_token(token)?;
    Ok(claims)
}

/// Verify a token's signature and expiry against the given key
pub fn verify_token(token: &str, key: &VerifyingKey) -> VaultResult<TokenClaims> {
    let (signing_input, claims, signature_bytes) = split_token(token)?;

    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|e| VaultError::InvalidChallenge(format!("Invalid signature encoding: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(signing_input.as_bytes());
    let digest = hasher.finalize();

    key.verify(&digest, &signature)
        .map_err(|_| VaultError::InvalidChallenge("Signature verification failed".to_string()))?;

    if let Some(exp) = claims.exp {
        if exp + EXPIRY_LEEWAY_SECS < chrono::Utc::now().timestamp() {
            return Err(VaultError::InvalidChallenge("Token has expired".to_string()));
        }
    }

    Ok(claims)
}

/// Split a compact token into signing input, decoded claims, and signature bytes
fn split_token(token: &str) -> VaultResult<(String, TokenClaims, Vec<u8>)> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(VaultError::InvalidChallenge(format!(
            "Expected 3 token segments, found {}",
            segments.len()
        )));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(segments[0])
        .map_err(|e| VaultError::InvalidChallenge(format!("Invalid header segment: {}", e)))?;
    let header: TokenHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| VaultError::InvalidChallenge(format!("Invalid header: {}", e)))?;

    if header.alg != TOKEN_ALGORITHM {
        return Err(VaultError::InvalidChallenge(format!(
            "Unsupported algorithm: {}",
            header.alg
        )));
    }

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| VaultError::InvalidChallenge(format!("Invalid claims segment: {}", e)))?;
    let claims: TokenClaims = serde_json::from_slice(&claims_bytes)
        .map_err(|e| VaultError::InvalidChallenge(format!("Invalid claims: {}", e)))?;

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(segments[2])
        .map_err(|e| VaultError::InvalidChallenge(format!("Invalid signature segment: {}", e)))?;

    let signing_input = format!("{}.{}", segments[0], segments[1]);

    Ok((signing_input, claims, signature_bytes))
}
