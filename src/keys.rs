//! Key namespacing and deterministic request keys

use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Separator between a namespace and the local key.
pub const SEPARATOR: char = '-';

/// A validated namespace prefix within the shared backend.
///
/// Every key stored by a cache or vault instance is `"{namespace}-{key}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    name: String,
    prefix: String,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "namespace must not be empty".to_string(),
            ));
        }
        if name.ends_with(SEPARATOR) {
            return Err(StoreError::InvalidArgument(format!(
                "namespace '{}' must not end with '{}'",
                name, SEPARATOR
            )));
        }
        let prefix = format!("{}{}", name, SEPARATOR);
        Ok(Self { name, prefix })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `"{namespace}-"` prefix shared by all keys of this namespace
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full backend key for a local key
    pub fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Whether one namespace's keys can fall under the other's prefix.
    ///
    /// `asset-api` overlaps `asset-api-client`: flushing or sweeping the
    /// former also reaches keys of the latter.
    pub fn overlaps(&self, other: &Namespace) -> bool {
        self.prefix.starts_with(&other.prefix) || other.prefix.starts_with(&self.prefix)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Generate a deterministic cache key for a request.
///
/// The key is a SHA-256 hash of the endpoint, scope, and sorted parameters.
/// This ensures consistent keys regardless of parameter order.
pub fn request_key(endpoint: &str, scope: Option<&str>, params: &[(&str, &str)]) -> String {
    let mut hasher = Sha256::new();

    hasher.update(endpoint.as_bytes());
    hasher.update(b"|");

    // Scope is usually the signed-in user, so responses never cross identities
    if let Some(scope) = scope {
        hasher.update(scope.as_bytes());
    }
    hasher.update(b"|");

    let mut sorted_params: Vec<_> = params.iter().collect();
    sorted_params.sort_by_key(|(k, _)| *k);

    for (k, v) in sorted_params {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"&");
    }

    format!("{:x}", hasher.finalize())
}
