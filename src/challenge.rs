/// Challenge/response handshake against a remote vault
///
/// Per handshake attempt: parse the inbound challenge, verify it against its
/// claimed issuer, extract issuer and nonce, build a presentation, and sign a
/// response token addressed back to the challenger. No state survives an
/// attempt; a retry starts over with a fresh challenge.
use crate::{
    credential::{verify_presentation, CredentialIssuer, Presentation},
    error::{VaultError, VaultResult},
    identity::{self, DidResolver},
    token::{self, InstanceKey, TokenClaims},
};
use chrono::{DateTime, Months, Utc};
use k256::ecdsa::VerifyingKey;
use std::sync::Arc;

/// Subject claim carried by every handshake response token
pub const RESPONSE_SUBJECT: &str = "auth-response";

/// Calendar validity of a response token
const RESPONSE_VALIDITY_MONTHS: u32 = 24;

/// Claims extracted from a verified challenge token
#[derive(Debug, Clone)]
pub struct ChallengeClaims {
    /// The challenging vault's identity
    pub issuer: String,
    /// Single-use nonce the presentation must be bound to
    pub nonce: String,
}

/// A decoded and verified handshake response, for the verifying side
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub audience: String,
    pub presentation: Presentation,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Drives one challenge into one signed response token
pub struct ChallengeResponder {
    resolver: Arc<dyn DidResolver>,
    issuer: Arc<CredentialIssuer>,
    instance_key: Arc<InstanceKey>,
    instance_did: String,
}

impl ChallengeResponder {
    pub fn new(
        resolver: Arc<dyn DidResolver>,
        issuer: Arc<CredentialIssuer>,
        instance_key: Arc<InstanceKey>,
    ) -> Self {
        let instance_did = instance_key.instance_did();
        Self {
            resolver,
            issuer,
            instance_key,
            instance_did,
        }
    }

    /// Respond to a challenge token, issuing the response now
    pub async fn respond(&self, challenge_token: &str) -> VaultResult<String> {
        self.respond_at(challenge_token, Utc::now()).await
    }

    /// Respond to a challenge token with a caller-supplied issuance clock
    pub async fn respond_at(
        &self,
        challenge_token: &str,
        issued_at: DateTime<Utc>,
    ) -> VaultResult<String> {
        let claims = self.parse_challenge(challenge_token).await?;
        tracing::debug!("Challenge verified, issuer {}", claims.issuer);

        let credential = self.issuer.get_or_create_app_credential().await?;
        let presentation =
            self.issuer
                .build_presentation(&credential, &claims.issuer, &claims.nonce)?;

        self.sign_response(&presentation, &claims.issuer, issued_at)
    }

    /// Decode the challenge, check its signature against the claimed issuer,
    /// and extract the issuer identity and nonce
    pub async fn parse_challenge(&self, challenge_token: &str) -> VaultResult<ChallengeClaims> {
        let unverified = token::decode_claims(challenge_token)?;
        let claimed_issuer = unverified.iss;

        let issuer_doc = self
            .resolver
            .resolve_did(&claimed_issuer)
            .await
            .map_err(|e| {
                VaultError::InvalidChallenge(format!(
                    "Cannot resolve challenge issuer {}: {}",
                    claimed_issuer, e
                ))
            })?;

        let issuer_key = identity::signing_key(&issuer_doc).ok_or_else(|| {
            VaultError::InvalidChallenge(format!(
                "No verification key in issuer document {}",
                claimed_issuer
            ))
        })?;

        let verified = token::verify_token(challenge_token, &issuer_key)?;

        let nonce = verified
            .nonce
            .ok_or_else(|| VaultError::MalformedChallenge("Missing nonce claim".to_string()))?;
        if nonce.is_empty() {
            return Err(VaultError::MalformedChallenge("Empty nonce claim".to_string()));
        }

        Ok(ChallengeClaims {
            issuer: verified.iss,
            nonce,
        })
    }

    /// Sign the terminal response token carrying the presentation
    fn sign_response(
        &self,
        presentation: &Presentation,
        audience: &str,
        issued_at: DateTime<Utc>,
    ) -> VaultResult<String> {
        let expires_at = response_expiry(issued_at)?;

        let presentation_value = serde_json::to_value(presentation)
            .map_err(|e| VaultError::SigningFailed(format!("Failed to embed presentation: {}", e)))?;

        let claims = TokenClaims {
            iss: self.instance_did.clone(),
            sub: Some(RESPONSE_SUBJECT.to_string()),
            aud: Some(audience.to_string()),
            nonce: None,
            iat: issued_at.timestamp(),
            exp: Some(expires_at.timestamp()),
            payload: serde_json::json!({ "presentation": presentation_value }),
        };

        token::sign_token(&claims, &self.instance_key)
    }
}

/// Expiry of a response token: exactly two calendar years after issuance
pub fn response_expiry(issued_at: DateTime<Utc>) -> VaultResult<DateTime<Utc>> {
    issued_at
        .checked_add_months(Months::new(RESPONSE_VALIDITY_MONTHS))
        .ok_or_else(|| VaultError::SigningFailed("Response expiry overflow".to_string()))
}

/// Verify a response token against the responder's verifying key and extract
/// its audience and embedded presentation
///
/// This is the counterpart the vault side runs; it also lets callers check a
/// round trip end to end.
pub fn verify_response(response_token: &str, key: &VerifyingKey) -> VaultResult<AuthResponse> {
    let claims = token::verify_token(response_token, key)?;

    if claims.sub.as_deref() != Some(RESPONSE_SUBJECT) {
        return Err(VaultError::InvalidChallenge(format!(
            "Unexpected response subject: {:?}",
            claims.sub
        )));
    }

    let audience = claims
        .aud
        .ok_or_else(|| VaultError::MalformedChallenge("Missing audience claim".to_string()))?;
    let expires_at = claims
        .exp
        .ok_or_else(|| VaultError::MalformedChallenge("Missing expiry claim".to_string()))?;

    let presentation_value = claims
        .payload
        .get("presentation")
        .cloned()
        .ok_or_else(|| VaultError::MalformedChallenge("Missing presentation".to_string()))?;
    let presentation: Presentation = serde_json::from_value(presentation_value)
        .map_err(|e| VaultError::MalformedChallenge(format!("Invalid presentation: {}", e)))?;

    verify_presentation(&presentation, key)?;

    Ok(AuthResponse {
        audience,
        presentation,
        issued_at: claims.iat,
        expires_at,
    })
}
