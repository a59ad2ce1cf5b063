//! Top-level error types for Leadbridge.

use serde::Serialize;
use thiserror::Error;

use crate::http::ApiError;
use crate::store::StoreError;

/// Backend messages that mean the contact provider grant is missing or stale.
const CONTACTS_GRANT_MARKERS: &[&str] = &["No access", "refresh token"];

/// Coarse error classification, kept in [`SessionState`](crate::SessionState)
/// as the last authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    AuthExpired,
    Network,
    Backend,
    Store,
    Config,
}

/// Top-level error type encompassing all Leadbridge errors.
#[derive(Debug, Error)]
pub enum LeadbridgeError {
    /// Bad input; reported before any network call is made.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The CRM session is gone and could not be refreshed.
    #[error("authentication expired: {message}")]
    AuthExpired { message: String },

    /// Transport failure.
    #[error("network error: {message}")]
    Network { message: String },

    /// The backend answered but reported a failure; message passed through verbatim.
    #[error("{message}")]
    Backend { status: Option<u16>, message: String },

    /// Error from credential storage.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl LeadbridgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            status: None,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::AuthExpired { .. } => ErrorKind::AuthExpired,
            Self::Network { .. } => ErrorKind::Network,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Store(_) => ErrorKind::Store,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// The caller should prompt the user to log in to the CRM again.
    pub fn requires_crm_login(&self) -> bool {
        matches!(self, Self::AuthExpired { .. })
    }

    /// The backend lost access to the contact provider; the user should
    /// reconnect it.
    pub fn requires_contacts_reconnect(&self) -> bool {
        match self {
            Self::Backend { message, .. } => CONTACTS_GRANT_MARKERS
                .iter()
                .any(|marker| message.contains(marker)),
            _ => false,
        }
    }
}

impl From<ApiError> for LeadbridgeError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::AuthExpired { message } => Self::AuthExpired { message },
            ApiError::Network(e) => Self::Network {
                message: e.to_string(),
            },
            ApiError::Status { status, message } => Self::Backend {
                status: Some(status),
                message,
            },
            ApiError::Serialization { message } => Self::Backend {
                status: None,
                message,
            },
            ApiError::InvalidUrl { message } => Self::Config { message },
            ApiError::Store(e) => Self::Store(e),
        }
    }
}
