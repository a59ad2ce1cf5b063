//! Domain model types for Leadbridge.
//!
//! This module defines the core types used throughout Leadbridge:
//! - [`ProviderId`] - The two linked identity domains
//! - [`UserProfile`] - The CRM user that owns the current session
//! - [`Credential`] - Tokens held for one provider
//! - [`SessionState`] - Connection view derived from the credential store
//! - [`Contact`] / [`ContactOrigin`] - Entries of the aggregated contact list
//! - [`Pipeline`] / [`PipelineStatus`] - CRM workflow containers and stages

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::ErrorKind;
use crate::store::Secret;

/// Identifier for one of the two linked providers.
///
/// `Contacts` is the OAuth-popup authenticated contact source ("Provider A").
/// `Crm` is the credential authenticated CRM destination ("Provider B") and
/// the authority for every backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Contacts,
    Crm,
}

impl ProviderId {
    /// Get the provider as a string for storage keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Crm => "crm",
        }
    }

    /// The other provider.
    pub fn other(&self) -> Self {
        match self {
            Self::Contacts => Self::Crm,
            Self::Crm => Self::Contacts,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contacts" | "a" | "google" => Ok(Self::Contacts),
            "crm" | "b" | "kommo" => Ok(Self::Crm),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// The CRM user that owns the current session.
///
/// Set once per successful CRM login, cleared on full logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(alias = "username", alias = "name")]
    pub display_name: String,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Tokens held for one provider.
///
/// At most one access token per provider is live at a time; it is overwritten
/// on refresh or re-login. Only the credential store keeps these beyond the
/// lifetime of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub provider: ProviderId,
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
    pub issued_user: Option<UserProfile>,
}

impl Credential {
    /// Create a credential carrying only an access token.
    pub fn new(provider: ProviderId, access_token: impl Into<String>) -> Self {
        Self {
            provider,
            access_token: Secret::new(access_token),
            refresh_token: None,
            issued_user: None,
        }
    }

    /// Add a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }

    /// Add the user the credential was issued to.
    pub fn with_user(mut self, user: UserProfile) -> Self {
        self.issued_user = Some(user);
        self
    }
}

/// Connection view derived from the credential store.
///
/// Recomputed on every query and never mutated independently, so it cannot
/// drift from the stored tokens. `crm_connected` implies a user profile is
/// stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub contacts_connected: bool,
    pub crm_connected: bool,
    pub last_auth_error: Option<ErrorKind>,
}

impl SessionState {
    /// Whether the given provider is connected.
    pub fn is_connected(&self, provider: ProviderId) -> bool {
        match provider {
            ProviderId::Contacts => self.contacts_connected,
            ProviderId::Crm => self.crm_connected,
        }
    }

    /// True if at least one provider is linked.
    pub fn any_connected(&self) -> bool {
        self.contacts_connected || self.crm_connected
    }

    /// True if both providers are linked.
    pub fn fully_linked(&self) -> bool {
        self.contacts_connected && self.crm_connected
    }
}

/// Where a contact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactOrigin {
    /// Fetched from the contact provider; replaced wholesale on refresh.
    Remote,
    /// Imported locally; persists until explicitly cleared.
    Imported,
}

impl ContactOrigin {
    /// Id prefix that keeps ids of different origins from colliding.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Remote => "remote:",
            Self::Imported => "imported:",
        }
    }

    /// Source label the lead-generation endpoint expects.
    pub fn wire_source(&self) -> &'static str {
        match self {
            Self::Remote => "google",
            Self::Imported => "imported",
        }
    }
}

/// One entry of the aggregated contact collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Unique, origin-prefixed identifier.
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub origin: ContactOrigin,
}

impl Contact {
    /// Build a remote contact, prefixing the provider's id.
    pub fn remote(
        source_id: &str,
        name: impl Into<String>,
        phone: impl Into<String>,
        email: Option<String>,
    ) -> Self {
        let id = if source_id.starts_with(ContactOrigin::Remote.id_prefix()) {
            source_id.to_string()
        } else {
            format!("{}{}", ContactOrigin::Remote.id_prefix(), source_id)
        };
        Self {
            id,
            name: name.into(),
            phone: phone.into(),
            email: email.filter(|e| !e.trim().is_empty()),
            origin: ContactOrigin::Remote,
        }
    }

    /// The id without its origin prefix, as the contact provider knows it.
    pub fn source_id(&self) -> &str {
        self.id
            .strip_prefix(self.origin.id_prefix())
            .unwrap_or(&self.id)
    }

    /// Build an imported contact with a freshly synthesized id.
    pub fn imported(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: format!("{}{}", ContactOrigin::Imported.id_prefix(), uuid::Uuid::new_v4()),
            name: name.into(),
            phone: phone.into(),
            email: None,
            origin: ContactOrigin::Imported,
        }
    }
}

/// A CRM pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

impl Pipeline {
    /// Look up a pipeline by id.
    pub fn find<'a>(pipelines: &'a [Pipeline], id: &str) -> Option<&'a Pipeline> {
        pipelines.iter().find(|p| p.id == id)
    }
}

/// A stage within a CRM pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// Accept identifiers the backend sends either as JSON strings or numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Optional variant of [`string_or_number`]; `null` and absence map to `None`.
pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
