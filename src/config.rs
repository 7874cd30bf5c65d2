/// Configuration for the vault client agent
use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Identity network the agent operates against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Resolver endpoint for this network
    pub fn resolver_endpoint(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://resolver.boreal.network",
            Network::Testnet => "https://resolver.testnet.boreal.network",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl FromStr for Network {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(VaultError::Config(format!("Unknown network: {}", other))),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The application DID this agent acts on behalf of
    pub app_did: String,
    /// Network to resolve identities against (mainnet/testnet)
    pub network: Network,
    /// Directory for local agent state (instance key, working data)
    pub local_data_dir: PathBuf,
    /// Directory for the on-disk DID resolver cache
    pub resolver_cache_dir: PathBuf,
    /// Timeout applied to every resolver and vault round-trip, in seconds
    pub request_timeout_secs: u64,
}

impl AgentConfig {
    /// Create a configuration with default directories for the given app DID
    pub fn new(app_did: impl Into<String>, network: Network) -> Self {
        Self {
            app_did: app_did.into(),
            network,
            local_data_dir: PathBuf::from("./data/agent"),
            resolver_cache_dir: PathBuf::from("./data/did-cache"),
            request_timeout_secs: 30,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> VaultResult<Self> {
        dotenv::dotenv().ok();

        let app_did = env::var("VAULT_APP_DID")
            .map_err(|_| VaultError::Config("VAULT_APP_DID is required".to_string()))?;

        let network = env::var("VAULT_NETWORK")
            .unwrap_or_else(|_| "mainnet".to_string())
            .parse()?;

        let local_data_dir = env::var("VAULT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/agent"));

        let resolver_cache_dir = env::var("VAULT_RESOLVER_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/did-cache"));

        let request_timeout_secs = env::var("VAULT_REQUEST_TIMEOUT")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| VaultError::Config("Invalid VAULT_REQUEST_TIMEOUT".to_string()))?;

        let config = Self {
            app_did,
            network,
            local_data_dir,
            resolver_cache_dir,
            request_timeout_secs,
        };
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> VaultResult<()> {
        if !self.app_did.starts_with("did:") {
            return Err(VaultError::Config(format!(
                "Application DID must be a decentralized identifier: {}",
                self.app_did
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(VaultError::Config(
                "Request timeout must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
