//! Error types for safestash

use thiserror::Error;

/// Result type alias for safestash operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the library and CLI
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session expired, please sign in again")]
    SessionExpired,
}

/// Storage-layer errors shared by the cache and the vault.
///
/// The cache logs these and degrades to a miss; the vault propagates
/// everything except [`StoreError::KeyInvalidated`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Stored data is corrupted: {0}")]
    Corrupted(String),

    #[error("Encryption key is no longer usable")]
    KeyInvalidated,

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::StorageUnavailable(format!("Storage task failed: {}", err))
    }
}

/// Errors raised by a [`KeyStore`](crate::keystore::KeyStore).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key handle has been invalidated")]
    KeyInvalidated,

    #[error("Decryption failed: {0}")]
    Corrupted(String),

    #[error("Secure key storage unavailable: {0}")]
    Unavailable(String),
}

impl From<CryptoError> for StoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyInvalidated => StoreError::KeyInvalidated,
            CryptoError::Corrupted(msg) => StoreError::Corrupted(msg),
            CryptoError::Unavailable(msg) => StoreError::StorageUnavailable(msg),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found.")]
    NotFound,

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expired_message() {
        let err = Error::SessionExpired;
        assert_eq!(err.to_string(), "Session expired, please sign in again");
    }

    #[test]
    fn test_store_error_corrupted() {
        let err = StoreError::Corrupted("bad tag".to_string());
        assert!(err.to_string().contains("bad tag"));
    }

    #[test]
    fn test_crypto_error_maps_to_store_error() {
        match StoreError::from(CryptoError::KeyInvalidated) {
            StoreError::KeyInvalidated => (),
            other => panic!("Expected KeyInvalidated, got {:?}", other),
        }

        match StoreError::from(CryptoError::Corrupted("tag".to_string())) {
            StoreError::Corrupted(msg) => assert_eq!(msg, "tag"),
            other => panic!("Expected Corrupted, got {:?}", other),
        }

        match StoreError::from(CryptoError::Unavailable("no device".to_string())) {
            StoreError::StorageUnavailable(msg) => assert!(msg.contains("no device")),
            other => panic!("Expected StorageUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_store_error_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        match StoreError::from(json_err) {
            StoreError::Serialization(_) => (),
            other => panic!("Expected Serialization, got {:?}", other),
        }
    }

    #[test]
    fn test_error_from_store_error() {
        let err: Error = StoreError::KeyInvalidated.into();
        match err {
            Error::Store(StoreError::KeyInvalidated) => (),
            _ => panic!("Expected Error::Store(StoreError::KeyInvalidated)"),
        }
    }

    #[test]
    fn test_error_from_config_error() {
        let cfg_err = ConfigError::NotFound;
        let err: Error = cfg_err.into();

        match err {
            Error::Config(ConfigError::NotFound) => (),
            _ => panic!("Expected Error::Config(ConfigError::NotFound)"),
        }
    }

    #[test]
    fn test_config_error_from_yaml_error() {
        let yaml_str = "invalid: [yaml: content";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let config_err: ConfigError = yaml_err.into();

        match config_err {
            ConfigError::ParseError(_) => (),
            _ => panic!("Expected ConfigError::ParseError"),
        }
    }
}
