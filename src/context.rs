/// Identity context - process-wide wiring of the vault client services
use crate::{
    challenge::ChallengeResponder,
    config::{AgentConfig, Network},
    credential::{CredentialConnector, CredentialIssuer},
    error::{VaultError, VaultResult},
    identity::{DidCache, DidResolver, HttpDidResolver},
    query::QueryEngine,
    session::{Session, SessionCache},
    token::InstanceKey,
    transport::{HttpVaultTransport, VaultTransport},
};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const INSTANCE_KEY_FILE: &str = "instance.key";

lazy_static! {
    static ref GLOBAL_CONTEXT: RwLock<Option<Arc<IdentityContext>>> = RwLock::new(None);
}

/// Shared context holding the local identity, resolver configuration, and
/// the services built on them
///
/// Components take the context (or the services inside it) by handle; the
/// process-global slot behind `initialize`/`instance` is a convenience for
/// application code, and tests construct contexts directly.
pub struct IdentityContext {
    config: AgentConfig,
    instance_key: Arc<InstanceKey>,
    issuer: Arc<CredentialIssuer>,
    responder: Arc<ChallengeResponder>,
    sessions: Arc<SessionCache>,
    engine: Arc<QueryEngine>,
}

impl IdentityContext {
    /// Build a context with HTTP resolver and transport for the configured
    /// network, loading (or creating) the instance key under the data
    /// directory
    pub async fn new(
        config: AgentConfig,
        connector: Arc<dyn CredentialConnector>,
    ) -> VaultResult<Self> {
        config.validate()?;
        Self::ensure_directories(&config).await?;

        let instance_key = Arc::new(load_or_create_instance_key(&config.local_data_dir).await?);

        let timeout = Duration::from_secs(config.request_timeout_secs);
        let cache = DidCache::open(&config.resolver_cache_dir).await?;
        let resolver = Arc::new(HttpDidResolver::new(
            cache,
            config.network.resolver_endpoint(),
            timeout,
        )?);
        let transport = Arc::new(HttpVaultTransport::new(timeout)?);

        Self::with_services(config, connector, resolver, transport, instance_key)
    }

    /// Build a context over caller-supplied collaborators
    pub fn with_services(
        config: AgentConfig,
        connector: Arc<dyn CredentialConnector>,
        resolver: Arc<dyn DidResolver>,
        transport: Arc<dyn VaultTransport>,
        instance_key: Arc<InstanceKey>,
    ) -> VaultResult<Self> {
        config.validate()?;

        let issuer = Arc::new(CredentialIssuer::new(
            instance_key.instance_did(),
            instance_key.clone(),
            connector,
        ));
        let responder = Arc::new(ChallengeResponder::new(
            resolver.clone(),
            issuer.clone(),
            instance_key.clone(),
        ));
        let sessions = Arc::new(SessionCache::new(
            resolver,
            responder.clone(),
            transport.clone(),
            instance_key.instance_did(),
        ));
        let engine = Arc::new(QueryEngine::new(
            sessions.clone(),
            transport,
            config.app_did.clone(),
        ));

        Ok(Self {
            config,
            instance_key,
            issuer,
            responder,
            sessions,
            engine,
        })
    }

    /// Set up the process-wide context exactly once
    pub async fn initialize(
        config: AgentConfig,
        connector: Arc<dyn CredentialConnector>,
    ) -> VaultResult<Arc<Self>> {
        if GLOBAL_CONTEXT.read().is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        let context = Arc::new(Self::new(config, connector).await?);

        let mut slot = GLOBAL_CONTEXT.write();
        if slot.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }
        *slot = Some(context.clone());

        tracing::info!(
            "Identity context initialized for {} on {}",
            context.config.app_did,
            context.config.network.as_str()
        );
        Ok(context)
    }

    /// Get the process-wide context set up by `initialize`
    pub fn instance() -> VaultResult<Arc<Self>> {
        GLOBAL_CONTEXT
            .read()
            .clone()
            .ok_or(VaultError::NotInitialized)
    }

    /// The application DID this agent acts for
    pub fn app_did(&self) -> &str {
        &self.config.app_did
    }

    /// The configured identity network
    pub fn network(&self) -> Network {
        self.config.network
    }

    /// Directory holding local agent state
    pub fn local_data_dir(&self) -> &Path {
        &self.config.local_data_dir
    }

    /// Directory holding the resolver cache
    pub fn resolver_cache_dir(&self) -> &Path {
        &self.config.resolver_cache_dir
    }

    /// The app-instance DID derived from the instance key
    pub fn instance_did(&self) -> String {
        self.instance_key.instance_did()
    }

    pub fn credential_issuer(&self) -> &Arc<CredentialIssuer> {
        &self.issuer
    }

    pub fn challenge_responder(&self) -> &Arc<ChallengeResponder> {
        &self.responder
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    pub fn query_engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    /// Get (or build) the session for a target identity
    pub async fn get_session(&self, target_did: &str) -> VaultResult<Arc<Session>> {
        self.sessions.get_session(target_did).await
    }

    /// Ensure the configured directories exist
    async fn ensure_directories(config: &AgentConfig) -> VaultResult<()> {
        for dir in [&config.local_data_dir, &config.resolver_cache_dir] {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    VaultError::Config(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }
        Ok(())
    }
}

/// Load the persisted instance key, generating and persisting one on first run
async fn load_or_create_instance_key(data_dir: &Path) -> VaultResult<InstanceKey> {
    let path = data_dir.join(INSTANCE_KEY_FILE);

    if path.exists() {
        let hex_key = tokio::fs::read_to_string(&path).await?;
        return InstanceKey::from_hex(&hex_key);
    }

    let key = InstanceKey::generate();
    tokio::fs::write(&path, key.private_key_hex()).await?;
    tracing::info!("Generated new app-instance key at {:?}", path);

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{ClaimRequest, Credential, Presentation};
    use async_trait::async_trait;

    struct NullConnector;

    #[async_trait]
    impl CredentialConnector for NullConnector {
        async fn existing_app_credential(&self) -> VaultResult<Option<Credential>> {
            Ok(None)
        }

        async fn issue_app_credential(&self) -> VaultResult<Credential> {
            Err(VaultError::CredentialUnavailable("no wallet".to_string()))
        }

        async fn request_user_credentials(
            &self,
            _claims: &[ClaimRequest],
        ) -> VaultResult<Presentation> {
            Err(VaultError::CredentialUnavailable("no wallet".to_string()))
        }
    }

    fn test_config(base: &Path) -> AgentConfig {
        let mut config = AgentConfig::new("did:boreal:app123", Network::Testnet);
        config.local_data_dir = base.join("agent");
        config.resolver_cache_dir = base.join("did-cache");
        config
    }

    #[tokio::test]
    async fn test_context_construction_and_accessors() {
        let dir = tempfile::tempdir().unwrap();
        let context = IdentityContext::new(test_config(dir.path()), Arc::new(NullConnector))
            .await
            .unwrap();

        assert_eq!(context.app_did(), "did:boreal:app123");
        assert_eq!(context.network(), Network::Testnet);
        assert!(context.local_data_dir().exists());
        assert!(context.resolver_cache_dir().exists());
        assert!(context.instance_did().starts_with("did:key:z"));
    }

    #[tokio::test]
    async fn test_instance_key_persists_across_contexts() {
        let dir = tempfile::tempdir().unwrap();

        let first = IdentityContext::new(test_config(dir.path()), Arc::new(NullConnector))
            .await
            .unwrap();
        let second = IdentityContext::new(test_config(dir.path()), Arc::new(NullConnector))
            .await
            .unwrap();

        assert_eq!(first.instance_did(), second.instance_did());
    }

    #[tokio::test]
    async fn test_two_contexts_coexist_in_one_process() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let a = IdentityContext::new(test_config(dir_a.path()), Arc::new(NullConnector))
            .await
            .unwrap();
        let b = IdentityContext::new(test_config(dir_b.path()), Arc::new(NullConnector))
            .await
            .unwrap();

        // Independent instance keys, no shared global state
        assert_ne!(a.instance_did(), b.instance_did());
    }

    #[tokio::test]
    async fn test_global_slot_lifecycle() {
        let dir = tempfile::tempdir().unwrap();

        // Before initialization the global accessor refuses
        assert!(matches!(
            IdentityContext::instance(),
            Err(VaultError::NotInitialized)
        ));

        IdentityContext::initialize(test_config(dir.path()), Arc::new(NullConnector))
            .await
            .unwrap();

        assert!(IdentityContext::instance().is_ok());

        // A second initialization is refused
        let again =
            IdentityContext::initialize(test_config(dir.path()), Arc::new(NullConnector)).await;
        assert!(matches!(again, Err(VaultError::AlreadyInitialized)));
    }
}
