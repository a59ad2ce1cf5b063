//! Session lifecycle for the two linked providers.
//!
//! [`SessionManager`] derives the connection view from the credential store
//! on every query, connects and disconnects each provider, and reconciles
//! state after the detached contact-provider login completes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use url::Url;

use crate::config::{ClientConfig, Endpoints};
use crate::contacts::parse_remote_contacts;
use crate::error::{ErrorKind, LeadbridgeError};
use crate::http::{ApiClient, ApiRequest};
use crate::model::{Credential, ProviderId, SessionState, UserProfile};
use crate::store::{CredentialStore, Secret};
use crate::surface::{AuthSurface, SurfaceEvent};

/// Marker stored for the contact provider; its real token lives in the backend.
const CONTACTS_SESSION_MARKER: &str = "active";

/// Username and password for the CRM login.
#[derive(Debug, Clone, Serialize)]
pub struct CrmCredentials {
    pub username: String,
    pub password: Secret,
}

impl CrmCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password),
        }
    }
}

/// How a contact-provider connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The surface posted the expected completion message.
    Connected,
    /// The surface was closed without a message, but the contact list is
    /// readable.
    ConfirmedAfterClose,
    /// The surface was closed and the contact list is not readable.
    Cancelled,
    /// Nothing happened before the wait limit.
    TimedOut,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::ConfirmedAfterClose)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthUrlResponse {
    auth_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: UserProfile,
}

/// Owns the connect/disconnect lifecycle of both providers.
pub struct SessionManager {
    store: CredentialStore,
    api: ApiClient,
    endpoints: Endpoints,
    poll_interval: Duration,
    auth_timeout: Duration,
    expected_origin: String,
    success_message: String,
    last_auth_error: parking_lot::Mutex<Option<ErrorKind>>,
}

impl SessionManager {
    pub fn new(
        store: CredentialStore,
        api: ApiClient,
        config: &ClientConfig,
    ) -> Result<Self, LeadbridgeError> {
        Ok(Self {
            store,
            api,
            endpoints: config.endpoints.clone(),
            poll_interval: config.auth_poll_interval(),
            auth_timeout: config.auth_timeout(),
            expected_origin: config.expected_origin()?,
            success_message: config.auth_success_message.clone(),
            last_auth_error: parking_lot::Mutex::new(None),
        })
    }

    /// Current connection view, read fresh from the store.
    ///
    /// A store that cannot be read reports the affected provider as
    /// disconnected.
    pub fn state(&self) -> SessionState {
        let contacts_connected = match self.store.get(ProviderId::Contacts) {
            Ok(credential) => credential.is_some(),
            Err(e) => {
                tracing::warn!("Failed to read contacts credential: {}", e);
                false
            }
        };
        let crm_connected = match self.store.get(ProviderId::Crm) {
            Ok(credential) => credential.is_some_and(|c| c.issued_user.is_some()),
            Err(e) => {
                tracing::warn!("Failed to read CRM credential: {}", e);
                false
            }
        };
        SessionState {
            contacts_connected,
            crm_connected,
            last_auth_error: *self.last_auth_error.lock(),
        }
    }

    /// The user of the current CRM session, if any.
    pub fn current_user(&self) -> Result<Option<UserProfile>, LeadbridgeError> {
        Ok(self.store.user_profile()?)
    }

    /// Record an error raised elsewhere so the session view can surface
    /// authentication failures.
    pub fn note_error(&self, error: &LeadbridgeError) {
        if error.requires_crm_login() {
            *self.last_auth_error.lock() = Some(error.kind());
        }
    }

    /// Ask the backend who the current session belongs to.
    pub async fn check_auth_status(&self) -> Result<UserProfile, LeadbridgeError> {
        let result = self
            .api
            .execute_json::<UserProfile>(ApiRequest::get(self.endpoints.auth_status.clone()))
            .await
            .map_err(LeadbridgeError::from);
        if let Err(e) = &result {
            self.note_error(e);
        }
        result
    }

    /// Authorization URL for the contact provider login.
    pub async fn contacts_auth_url(&self) -> Result<Url, LeadbridgeError> {
        let response: AuthUrlResponse = self
            .api
            .execute_json(ApiRequest::get(self.endpoints.contacts_auth_url.clone()))
            .await?;
        let raw = response
            .auth_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                LeadbridgeError::backend("backend did not return an authorization URL")
            })?;
        Url::parse(&raw)
            .map_err(|e| LeadbridgeError::backend(format!("invalid authorization URL: {}", e)))
    }

    /// Link the contact provider through a detached login surface.
    ///
    /// Polls the surface at a fixed interval until it posts the expected
    /// completion message, is closed, or the configured wait limit passes.
    /// A close without a message is ambiguous, so the contact list is
    /// fetched to see whether access was granted.
    pub async fn connect_contacts(
        &self,
        surface: &mut dyn AuthSurface,
    ) -> Result<ConnectOutcome, LeadbridgeError> {
        let url = self.contacts_auth_url().await?;
        surface.open(&url).await?;
        tracing::info!("Waiting for contact provider login to complete");

        let deadline = Instant::now() + self.auth_timeout;
        loop {
            match surface.poll().await {
                SurfaceEvent::Message { origin, payload } => {
                    if self.is_completion(&origin, &payload) {
                        surface.close().await;
                        self.mark_contacts_connected()?;
                        tracing::info!("Contact provider connected");
                        return Ok(ConnectOutcome::Connected);
                    }
                    tracing::warn!(
                        "Ignoring auth surface message from unexpected origin {:?}",
                        origin
                    );
                }
                SurfaceEvent::Closed => return self.reconcile_after_close().await,
                SurfaceEvent::Pending => {}
            }

            if Instant::now() >= deadline {
                surface.close().await;
                tracing::warn!(
                    "Contact provider login did not finish within {:?}",
                    self.auth_timeout
                );
                return Ok(ConnectOutcome::TimedOut);
            }
            sleep(self.poll_interval).await;
        }
    }

    fn is_completion(&self, origin: &str, payload: &str) -> bool {
        origin.trim_end_matches('/') == self.expected_origin && payload == self.success_message
    }

    /// A close without a message only counts as connected if the contact
    /// list can actually be read; the CRM session says nothing about the
    /// contact provider grant.
    async fn reconcile_after_close(&self) -> Result<ConnectOutcome, LeadbridgeError> {
        tracing::debug!("Auth surface closed without a completion message, checking contacts");
        let result = self
            .api
            .execute(ApiRequest::get(self.endpoints.contacts_list.clone()))
            .await
            .map_err(LeadbridgeError::from)
            .and_then(parse_remote_contacts);
        match result {
            Ok(_) => {
                self.mark_contacts_connected()?;
                tracing::info!("Contact provider connection confirmed after surface closed");
                Ok(ConnectOutcome::ConfirmedAfterClose)
            }
            Err(e) => {
                self.note_error(&e);
                tracing::info!("Contact provider login cancelled: {}", e);
                Ok(ConnectOutcome::Cancelled)
            }
        }
    }

    fn mark_contacts_connected(&self) -> Result<(), LeadbridgeError> {
        self.store
            .put(&Credential::new(ProviderId::Contacts, CONTACTS_SESSION_MARKER))?;
        Ok(())
    }

    /// Log in to the CRM.
    ///
    /// On failure the backend's message is returned verbatim and any prior
    /// session is left untouched.
    pub async fn connect_crm(
        &self,
        credentials: &CrmCredentials,
    ) -> Result<UserProfile, LeadbridgeError> {
        let request = ApiRequest::post(self.endpoints.login.clone())
            .unauthenticated()
            .json(credentials)?;
        let body = self.api.execute(request).await?;

        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("login rejected by backend");
            return Err(LeadbridgeError::backend(message));
        }

        let login: LoginResponse = serde_json::from_value(body)
            .map_err(|e| LeadbridgeError::backend(format!("unexpected login response: {}", e)))?;

        let mut credential =
            Credential::new(ProviderId::Crm, login.token).with_user(login.user.clone());
        if let Some(refresh) = login.refresh_token {
            credential = credential.with_refresh_token(refresh);
        }
        self.store.put(&credential)?;
        *self.last_auth_error.lock() = None;

        tracing::info!("CRM connected as {}", login.user.display_name);
        Ok(login.user)
    }

    /// Disconnect the contact provider.
    pub async fn disconnect_contacts(&self) -> Result<(), LeadbridgeError> {
        self.disconnect(ProviderId::Contacts).await
    }

    /// Disconnect the CRM.
    pub async fn disconnect_crm(&self) -> Result<(), LeadbridgeError> {
        self.disconnect(ProviderId::Crm).await
    }

    /// Disconnect one provider.
    ///
    /// The logout call is best effort; local cleanup always runs. The shared
    /// session pair is removed only if the other provider is not connected.
    pub async fn disconnect(&self, provider: ProviderId) -> Result<(), LeadbridgeError> {
        let endpoint = match provider {
            ProviderId::Contacts => self.endpoints.contacts_logout.clone(),
            ProviderId::Crm => self.endpoints.logout.clone(),
        };
        self.best_effort_logout(endpoint).await;

        self.store.clear(provider)?;
        if !self.state().is_connected(provider.other()) {
            self.store.clear_session_tokens()?;
            tracing::debug!("No provider left connected, cleared session tokens");
        }

        tracing::info!("Disconnected {}", provider);
        Ok(())
    }

    /// Log out of everything and remove every stored credential.
    pub async fn full_logout(&self) -> Result<(), LeadbridgeError> {
        self.best_effort_logout(self.endpoints.logout.clone()).await;
        self.store.clear_all()?;
        *self.last_auth_error.lock() = None;
        tracing::info!("Logged out of all providers");
        Ok(())
    }

    async fn best_effort_logout(&self, endpoint: String) {
        if let Err(e) = self.api.execute(ApiRequest::post(endpoint)).await {
            tracing::warn!("Logout request failed, continuing with local cleanup: {}", e);
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("expected_origin", &self.expected_origin)
            .field("poll_interval", &self.poll_interval)
            .field("auth_timeout", &self.auth_timeout)
            .finish_non_exhaustive()
    }
}
