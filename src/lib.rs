/// Boreal Vault - DID-authenticated client for personal data vaults
///
/// An application instance authenticates itself to user-owned remote vaults
/// with decentralized-identity credentials, keeps one live session per target
/// identity, and runs filtered, paginated script queries and collection
/// mutations against them.
///
/// Typical flow: build an [`IdentityContext`] once at startup, ask it for the
/// session to a target DID, then run queries through the [`QueryEngine`] or
/// push results through a [`DispatchPipeline`].

pub mod challenge;
pub mod config;
pub mod context;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod query;
pub mod scripts;
pub mod session;
pub mod token;
pub mod transport;

#[cfg(test)]
pub(crate) mod testkit;

pub use challenge::{AuthResponse, ChallengeClaims, ChallengeResponder};
pub use config::{AgentConfig, Network};
pub use context::IdentityContext;
pub use credential::{
    ClaimRequest, Credential, CredentialConnector, CredentialIssuer, Presentation,
};
pub use dispatch::{DispatchPipeline, Dispatcher};
pub use error::{VaultError, VaultResult};
pub use identity::{DidDocument, DidResolver, HttpDidResolver};
pub use query::{Page, QueryEngine, QuerySource, QuerySpec, ResultItem, MAX_QUERY_LIMIT};
pub use session::{Session, SessionCache};
pub use token::InstanceKey;
pub use transport::{AccessGrant, HttpVaultTransport, VaultTransport};
