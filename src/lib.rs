//! safestash - on-device persistence for API responses and credentials
//!
//! Two stores share one key-value backend:
//!
//! - [`cache::TtlCache`]: namespaced response cache with per-entry expiry and
//!   a background sweeper. Failures degrade to cache misses.
//! - [`vault::CredentialVault`]: encrypted store for credentials and session
//!   tokens. Failures are reported, except an invalidated key which is
//!   recovered by discarding the record.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod keystore;
pub mod session;
pub mod vault;

pub use error::{Error, Result};
