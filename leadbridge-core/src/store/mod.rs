//! Persistent key-value storage.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`KeyValueStore`] - Trait for flat string key/value backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`FileStore`] - JSON file implementation that survives restarts
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`CredentialStore`] - Typed view over a backend holding provider tokens,
//!   the user profile and the imported contact list
//! - [`create_store`] - Helper to select a backend from configuration
//!
//! # Storage Key Convention
//!
//! Keys follow the pattern: `leadbridge/{scope}/{entry}`, for example
//! `leadbridge/session/access_token`. Values are plain strings; structured
//! values (user profile, imported contacts) are stored as JSON text.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod credentials;
mod file;
#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;

pub use credentials::{CredentialStore, SessionTokens, TokenProvider};
pub use file::FileStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;
pub use memory::MemoryStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the backing memory is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for key-value store operations.
///
/// A missing key is never an error; lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over flat string key/value backends.
///
/// All operations are synchronous and apply completely or not at all.
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a value at the given key, overwriting any existing value.
    fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError>;

    /// Delete a value by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Store several values as one logical step.
    fn set_many(&self, entries: &[(&str, &Secret)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Delete several keys as one logical step.
    fn delete_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }

    /// Store `sets` and delete `deletes` as one logical step.
    ///
    /// Backends that can write several keys at once override this so a
    /// failure leaves every key as it was.
    fn apply(&self, sets: &[(&str, &Secret)], deletes: &[&str]) -> Result<(), StoreError> {
        self.set_many(sets)?;
        self.delete_many(deletes)
    }

    /// Check if a key exists without retrieving the value.
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON file on disk.
    #[default]
    File,
    /// Process memory only; nothing survives a restart.
    Memory,
    /// Platform keyring.
    Keyring,
}

/// Create a key-value store for the requested backend.
///
/// # Backend Selection Logic
///
/// - `File`: opens (or creates) the JSON file at `path`
/// - `Keyring`: attempts a [`KeyringStore`], falling back to [`MemoryStore`]
///   with a warning if the keyring is unavailable or the feature is disabled
/// - `Memory`: returns [`MemoryStore`]
pub fn create_store(
    backend: StoreBackend,
    path: &Path,
) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    match backend {
        StoreBackend::File => {
            tracing::debug!("Using file credential storage at {:?}", path);
            Ok(Arc::new(FileStore::open(path)?))
        }
        StoreBackend::Keyring => Ok(keyring_or_memory()),
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory credential storage");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(feature = "keyring-store")]
fn keyring_or_memory() -> Arc<dyn KeyValueStore> {
    match KeyringStore::try_new("leadbridge") {
        Ok(store) => {
            tracing::info!("Using OS keyring for credential storage");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), falling back to memory store. \
                 Credentials will not persist across restarts.",
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
fn keyring_or_memory() -> Arc<dyn KeyValueStore> {
    tracing::warn!(
        "Keyring storage requested but keyring-store feature not enabled. \
         Using memory store. Credentials will not persist across restarts."
    );
    Arc::new(MemoryStore::new())
}
