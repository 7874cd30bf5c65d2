/// Unified error types for the boreal-vault client
use thiserror::Error;

/// Main error type for vault client operations
#[derive(Error, Debug)]
pub enum VaultError {
    /// The identity context has not been initialized yet
    #[error("Identity context is not initialized")]
    NotInitialized,

    /// The identity context was initialized twice
    #[error("Identity context is already initialized")]
    AlreadyInitialized,

    /// An inbound challenge token failed decoding or signature verification
    #[error("Invalid challenge: {0}")]
    InvalidChallenge(String),

    /// A challenge decoded and verified but is missing required claims
    #[error("Malformed challenge: {0}")]
    MalformedChallenge(String),

    /// The credential connector could not produce an application credential
    #[error("Application credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The local signing key or key store is unusable
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Session construction for a target identity failed
    #[error("Session unavailable for {target}")]
    SessionUnavailable {
        target: String,
        #[source]
        source: Box<VaultError>,
    },

    /// A remote scripted call failed
    #[error("Remote script call '{script}' failed")]
    RemoteCallFailed {
        script: String,
        #[source]
        source: Box<VaultError>,
    },

    /// A raw record is missing a required field or carries an invalid value
    #[error("Record field '{field}' is missing or invalid")]
    ParseError { field: &'static str },

    /// The vault returned data violating a domain uniqueness guarantee
    #[error("Data integrity violation: {0}")]
    DataIntegrityError(String),

    /// A dispatch sink rejected an item; later items were not delivered
    #[error("Dispatch failed at item {index}")]
    DispatchFailed {
        index: usize,
        #[source]
        source: Box<VaultError>,
    },

    /// The remote vault rejected the session grant
    #[error("Session rejected by remote vault")]
    Unauthorized,

    /// DID resolution found no identity document
    #[error("DID not found: {0}")]
    DidNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resolver cache errors
    #[error("Resolver cache error: {0}")]
    Cache(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Errors reported by the remote vault outside the taxonomy above
    #[error("Remote vault error: {0}")]
    Remote(String),
}

/// Result type alias for vault client operations
pub type VaultResult<T> = Result<T, VaultError>;
