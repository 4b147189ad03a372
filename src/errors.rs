use std::io;

use thiserror::Error;

/// All errors that can occur in CryptoVault.
#[derive(Debug, Error)]
pub enum VaultError {
    // --- Caller errors ---
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Secret '{0}' not found")]
    NotFound(String),

    // --- Crypto errors ---
    #[error("Authentication failed: secret was tampered with or does not belong to this key")]
    AuthenticationFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Master key unavailable: {0}")]
    KeyUnavailable(String),

    // --- Storage errors ---
    #[error("Storage failure while {context}: {source}")]
    StorageFailure {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- Runtime errors ---
    #[error("Background task failed: {0}")]
    TaskFailed(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,
}

impl VaultError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        Self::StorageFailure {
            context: context.into(),
            source,
        }
    }

    /// Whether a failed write may succeed if attempted again.
    ///
    /// Only short-lived I/O conditions qualify. Authentication and key
    /// errors never do.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StorageFailure { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Whether this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<io::Error> for VaultError {
    fn from(err: io::Error) -> Self {
        Self::storage("performing I/O", err)
    }
}

/// Convenience type alias for CryptoVault results.
pub type Result<T> = std::result::Result<T, VaultError>;
