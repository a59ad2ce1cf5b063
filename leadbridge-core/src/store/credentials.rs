//! Typed credential storage on top of a [`KeyValueStore`].

use std::sync::Arc;

use super::{KeyValueStore, Secret, StoreError};
use crate::model::{Contact, Credential, ProviderId, UserProfile};

const SESSION_ACCESS_KEY: &str = "leadbridge/session/access_token";
const SESSION_REFRESH_KEY: &str = "leadbridge/session/refresh_token";
const CRM_ACCESS_KEY: &str = "leadbridge/crm/access_token";
const CONTACTS_ACCESS_KEY: &str = "leadbridge/contacts/access_token";
const USER_KEY: &str = "leadbridge/user";
const IMPORTED_CONTACTS_KEY: &str = "leadbridge/contacts/imported";

/// Every credential key; imported contacts are not credentials.
const CREDENTIAL_KEYS: &[&str] = &[
    SESSION_ACCESS_KEY,
    SESSION_REFRESH_KEY,
    CRM_ACCESS_KEY,
    CONTACTS_ACCESS_KEY,
    USER_KEY,
];

/// The access/refresh pair every backend call authenticates with.
///
/// The pair is shared infrastructure: it is written by a CRM login and is
/// only removed when no provider still needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
}

/// Source of the bearer token attached to each outbound request.
///
/// The HTTP client calls this per request instead of keeping a copy, so a
/// token written by a refresh or a login is visible to the very next call.
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, if any.
    fn bearer_token(&self) -> Option<Secret>;

    /// Current refresh token, if any.
    fn refresh_token(&self) -> Option<Secret>;

    /// Persist an access token obtained from a refresh.
    fn store_refreshed(&self, access_token: &Secret) -> Result<(), StoreError>;

    /// Drop the CRM credential, the session pair and the user profile.
    fn invalidate_crm_session(&self) -> Result<(), StoreError>;
}

/// Process-wide credential store.
///
/// Cloning is cheap and every clone shares the same backend; last write wins.
/// Lookups of missing keys return `None` rather than failing.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Store a provider credential, replacing the previous one.
    ///
    /// A CRM credential also becomes the shared session pair and records the
    /// user it was issued to.
    pub fn put(&self, credential: &Credential) -> Result<(), StoreError> {
        match credential.provider {
            ProviderId::Contacts => self
                .backend
                .set(CONTACTS_ACCESS_KEY, &credential.access_token),
            ProviderId::Crm => {
                let user = credential
                    .issued_user
                    .as_ref()
                    .map(|u| serde_json::to_string(u).map(Secret::new))
                    .transpose()?;

                let mut sets: Vec<(&str, &Secret)> = vec![
                    (CRM_ACCESS_KEY, &credential.access_token),
                    (SESSION_ACCESS_KEY, &credential.access_token),
                ];
                let mut deletes = Vec::new();
                match &credential.refresh_token {
                    Some(refresh) => sets.push((SESSION_REFRESH_KEY, refresh)),
                    None => deletes.push(SESSION_REFRESH_KEY),
                }
                match &user {
                    Some(user) => sets.push((USER_KEY, user)),
                    None => deletes.push(USER_KEY),
                }
                self.backend.apply(&sets, &deletes)
            }
        }
    }

    /// Retrieve a provider credential.
    pub fn get(&self, provider: ProviderId) -> Result<Option<Credential>, StoreError> {
        match provider {
            ProviderId::Contacts => Ok(self
                .backend
                .get(CONTACTS_ACCESS_KEY)?
                .map(|token| Credential {
                    provider,
                    access_token: token,
                    refresh_token: None,
                    issued_user: None,
                })),
            ProviderId::Crm => {
                let Some(token) = self.backend.get(CRM_ACCESS_KEY)? else {
                    return Ok(None);
                };
                Ok(Some(Credential {
                    provider,
                    access_token: token,
                    refresh_token: self.backend.get(SESSION_REFRESH_KEY)?,
                    issued_user: self.user_profile()?,
                }))
            }
        }
    }

    /// Remove one provider's credential. Clearing the CRM also removes the
    /// user profile; the shared session pair is left alone.
    pub fn clear(&self, provider: ProviderId) -> Result<(), StoreError> {
        match provider {
            ProviderId::Contacts => self.backend.delete(CONTACTS_ACCESS_KEY),
            ProviderId::Crm => self.backend.delete_many(&[CRM_ACCESS_KEY, USER_KEY]),
        }
    }

    /// Remove every credential and the user profile in one step.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.backend.delete_many(CREDENTIAL_KEYS)
    }

    /// The shared access/refresh pair, if present.
    pub fn session_tokens(&self) -> Result<Option<SessionTokens>, StoreError> {
        let Some(access_token) = self.backend.get(SESSION_ACCESS_KEY)? else {
            return Ok(None);
        };
        Ok(Some(SessionTokens {
            access_token,
            refresh_token: self.backend.get(SESSION_REFRESH_KEY)?,
        }))
    }

    /// Remove the shared access/refresh pair.
    pub fn clear_session_tokens(&self) -> Result<(), StoreError> {
        self.backend
            .delete_many(&[SESSION_ACCESS_KEY, SESSION_REFRESH_KEY])
    }

    /// Overwrite the live access token after a refresh.
    pub fn store_refreshed_access_token(&self, token: &Secret) -> Result<(), StoreError> {
        if self.backend.exists(CRM_ACCESS_KEY)? {
            self.backend
                .set_many(&[(SESSION_ACCESS_KEY, token), (CRM_ACCESS_KEY, token)])
        } else {
            self.backend.set(SESSION_ACCESS_KEY, token)
        }
    }

    /// The stored user profile.
    ///
    /// An unreadable profile is treated as absent.
    pub fn user_profile(&self) -> Result<Option<UserProfile>, StoreError> {
        let Some(raw) = self.backend.get(USER_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(raw.expose()) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable stored user profile: {}", e);
                Ok(None)
            }
        }
    }

    /// Imported contacts saved by a previous run.
    pub fn imported_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        match self.backend.get(IMPORTED_CONTACTS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(raw.expose())?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the saved imported contact list.
    pub fn save_imported_contacts(&self, contacts: &[Contact]) -> Result<(), StoreError> {
        if contacts.is_empty() {
            return self.clear_imported_contacts();
        }
        let raw = Secret::new(serde_json::to_string(contacts)?);
        self.backend.set(IMPORTED_CONTACTS_KEY, &raw)
    }

    /// Forget the saved imported contact list.
    pub fn clear_imported_contacts(&self) -> Result<(), StoreError> {
        self.backend.delete(IMPORTED_CONTACTS_KEY)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

impl TokenProvider for CredentialStore {
    fn bearer_token(&self) -> Option<Secret> {
        match self.session_tokens() {
            Ok(tokens) => tokens.map(|t| t.access_token),
            Err(e) => {
                tracing::warn!("Failed to read session token: {}", e);
                None
            }
        }
    }

    fn refresh_token(&self) -> Option<Secret> {
        match self.session_tokens() {
            Ok(tokens) => tokens.and_then(|t| t.refresh_token),
            Err(e) => {
                tracing::warn!("Failed to read refresh token: {}", e);
                None
            }
        }
    }

    fn store_refreshed(&self, access_token: &Secret) -> Result<(), StoreError> {
        self.store_refreshed_access_token(access_token)
    }

    fn invalidate_crm_session(&self) -> Result<(), StoreError> {
        self.backend.delete_many(&[
            SESSION_ACCESS_KEY,
            SESSION_REFRESH_KEY,
            CRM_ACCESS_KEY,
            USER_KEY,
        ])
    }
}
