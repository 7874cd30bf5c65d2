/// Sessions and the per-target session cache
use crate::{
    challenge::ChallengeResponder,
    error::{VaultError, VaultResult},
    identity::{self, DidResolver},
    transport::{AccessGrant, VaultTransport},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An authenticated handle to one target identity's vault
#[derive(Debug, Clone)]
pub struct Session {
    target_did: String,
    endpoint: String,
    grant: AccessGrant,
}

impl Session {
    /// The vault owner this session is authenticated against
    pub fn target_did(&self) -> &str {
        &self.target_did
    }

    /// The vault service endpoint resolved from the target's DID document
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The access grant authorizing calls on this session
    pub fn grant(&self) -> &AccessGrant {
        &self.grant
    }
}

type SessionSlot = Arc<Mutex<Option<Arc<Session>>>>;

/// Read-through cache of one live session per target identity
///
/// Concurrent callers for the same target serialize on that target's slot, so
/// a cold cache triggers exactly one handshake; callers for different targets
/// proceed fully in parallel. A failed construction leaves the slot empty so
/// the next caller retries from scratch.
pub struct SessionCache {
    resolver: Arc<dyn DidResolver>,
    responder: Arc<ChallengeResponder>,
    transport: Arc<dyn VaultTransport>,
    instance_did: String,
    slots: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionCache {
    pub fn new(
        resolver: Arc<dyn DidResolver>,
        responder: Arc<ChallengeResponder>,
        transport: Arc<dyn VaultTransport>,
        instance_did: String,
    ) -> Self {
        Self {
            resolver,
            responder,
            transport,
            instance_did,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get the live session for a target identity, building it on first use
    pub async fn get_session(&self, target_did: &str) -> VaultResult<Arc<Session>> {
        let slot = self.slot_for(target_did).await;

        // Same-target callers queue here; the winner runs the handshake and
        // the rest observe the filled slot.
        let mut guard = slot.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        match self.connect(target_did).await {
            Ok(session) => {
                let session = Arc::new(session);
                *guard = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("Session construction for {} failed: {}", target_did, e);
                Err(VaultError::SessionUnavailable {
                    target: target_did.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Drop the session for a target whose grant the remote side rejected
    pub async fn invalidate(&self, target_did: &str) {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(target_did).cloned()
        };

        if let Some(slot) = slot {
            *slot.lock().await = None;
            tracing::debug!("Invalidated session for {}", target_did);
        }
    }

    /// Number of live sessions currently cached
    pub async fn live_sessions(&self) -> usize {
        let slots = self.slots.lock().await;
        let mut live = 0;
        for slot in slots.values() {
            if slot.lock().await.is_some() {
                live += 1;
            }
        }
        live
    }

    /// Fetch (or create) the slot for a target; the map lock is held only
    /// long enough to clone the slot handle
    async fn slot_for(&self, target_did: &str) -> SessionSlot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(target_did.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Full handshake: resolve the target's vault endpoint, answer its
    /// challenge, and exchange the response for an access grant
    async fn connect(&self, target_did: &str) -> VaultResult<Session> {
        let target_doc = self.resolver.resolve_did(target_did).await?;

        let endpoint = identity::vault_service_endpoint(&target_doc).ok_or_else(|| {
            VaultError::Remote(format!(
                "No vault service endpoint in DID document for {}",
                target_did
            ))
        })?;

        tracing::debug!("Authenticating against {} at {}", target_did, endpoint);

        let challenge = self
            .transport
            .request_challenge(&endpoint, &self.instance_did)
            .await?;
        let response = self.responder.respond(&challenge).await?;
        let grant = self.transport.authenticate(&endpoint, &response).await?;

        Ok(Session {
            target_did: target_did.to_string(),
            endpoint,
            grant,
        })
    }
}
