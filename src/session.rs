//! Sign-in state kept in the credential vault
//!
//! Signing in or out flushes every registered response cache so one user's
//! cached data never shows up in another user's session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cache::TtlCache;
use crate::error::{Error, Result, StoreError};
use crate::vault::CredentialVault;

/// Vault id of the session token
pub const SESSION_ID: &str = "session";

/// Vault id of the saved login
pub const CREDENTIALS_ID: &str = "login";

/// Tokens this close to expiry are treated as expired
const EXPIRY_BUFFER_MINUTES: i64 = 5;

/// Saved login for silent re-authentication
#[derive(Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session token with expiry
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Check if the token is expired or will expire soon (within 5 minutes)
    pub fn is_expired(&self) -> bool {
        let buffer = chrono::Duration::minutes(EXPIRY_BUFFER_MINUTES);
        self.expires_at - buffer < Utc::now()
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Login/logout flow over a [`CredentialVault`] and the caches tied to the
/// signed-in identity.
pub struct SessionManager {
    vault: Arc<CredentialVault>,
    caches: Vec<Arc<TtlCache>>,
}

impl SessionManager {
    pub fn new(vault: Arc<CredentialVault>) -> Self {
        Self {
            vault,
            caches: Vec::new(),
        }
    }

    /// Register a cache to flush whenever the identity changes.
    ///
    /// Flushing works by key prefix, so a cache whose namespace overlaps the
    /// vault or an already registered cache is rejected.
    pub fn with_cache(mut self, cache: Arc<TtlCache>) -> Result<Self> {
        let namespace = cache.namespace();
        let clash = std::iter::once(self.vault.namespace())
            .chain(self.caches.iter().map(|c| c.namespace()))
            .find(|other| namespace.overlaps(other));
        if let Some(other) = clash {
            return Err(StoreError::InvalidArgument(format!(
                "cache namespace '{}' overlaps namespace '{}'",
                namespace, other
            ))
            .into());
        }
        self.caches.push(cache);
        Ok(self)
    }

    /// Store a new login and token, flushing every registered cache first
    pub async fn sign_in(&self, credentials: &Credentials, token: &SessionToken) -> Result<()> {
        self.flush_caches().await;

        self.vault.write(CREDENTIALS_ID, credentials).await?;
        self.vault.write(SESSION_ID, token).await?;
        log::info!("Signed in as {}", credentials.username);
        Ok(())
    }

    /// Current session token, if one is stored and not about to expire
    pub async fn session(&self) -> Result<Option<SessionToken>> {
        let token = self.vault.read::<SessionToken>(SESSION_ID).await?;
        Ok(token.filter(|t| !t.is_expired()))
    }

    /// Current session token, or [`Error::SessionExpired`].
    ///
    /// An unreadable session also asks the user to sign in again; use
    /// [`SessionManager::session`] to see the underlying error.
    pub async fn require_session(&self) -> Result<SessionToken> {
        match self.session().await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(Error::SessionExpired),
            Err(Error::Store(e)) => {
                log::warn!("Stored session is unreadable: {}", e);
                Err(Error::SessionExpired)
            }
            Err(e) => Err(e),
        }
    }

    /// Saved login, if any
    pub async fn credentials(&self) -> Result<Option<Credentials>> {
        Ok(self.vault.read::<Credentials>(CREDENTIALS_ID).await?)
    }

    /// Forget the session and login and flush all identity-scoped caches.
    ///
    /// Both vault records are removed even if one removal fails; the first
    /// error is returned.
    pub async fn sign_out(&self) -> Result<()> {
        self.flush_caches().await;

        let session = self.vault.delete(SESSION_ID).await;
        let login = self.vault.delete(CREDENTIALS_ID).await;
        session.and(login).map_err(|e: StoreError| e.into())
    }

    async fn flush_caches(&self) {
        let flushed =
            futures::future::join_all(self.caches.iter().map(|cache| cache.flush_all())).await;
        log::debug!(
            "Flushed {} cached entries across {} cache(s)",
            flushed.iter().sum::<usize>(),
            self.caches.len()
        );
    }
}
