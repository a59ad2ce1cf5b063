//! Application facade wiring every component together.

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::contacts::ContactAggregator;
use crate::error::LeadbridgeError;
use crate::http::ApiClient;
use crate::model::{Pipeline, PipelineStatus, SessionState, UserProfile};
use crate::session::{ConnectOutcome, CrmCredentials, SessionManager};
use crate::store::{CredentialStore, KeyValueStore, create_store};
use crate::surface::AuthSurface;
use crate::sync::{SyncJob, SyncOrchestrator, SyncReport};

/// One user's linked providers, contacts and sync operations.
///
/// Owns the single credential store and HTTP client every component shares.
#[derive(Debug)]
pub struct Workspace {
    config: ClientConfig,
    store: CredentialStore,
    api: ApiClient,
    session: SessionManager,
    contacts: ContactAggregator,
    sync: SyncOrchestrator,
}

impl Workspace {
    /// Open a workspace with the backend named in `config`.
    pub fn open(config: ClientConfig) -> Result<Self, LeadbridgeError> {
        let backend = create_store(config.store_backend, &config.resolved_store_path())?;
        Self::with_backend(config, backend)
    }

    /// Open a workspace over an explicit key-value backend.
    pub fn with_backend(
        config: ClientConfig,
        backend: Arc<dyn KeyValueStore>,
    ) -> Result<Self, LeadbridgeError> {
        let store = CredentialStore::new(backend);
        let api = ApiClient::from_config(&config, Arc::new(store.clone()))?;
        let session = SessionManager::new(store.clone(), api.clone(), &config)?;
        let contacts = ContactAggregator::load(store.clone())?;
        let sync = SyncOrchestrator::new(api.clone(), config.endpoints.clone());

        Ok(Self {
            config,
            store,
            api,
            session,
            contacts,
            sync,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn contacts(&self) -> &ContactAggregator {
        &self.contacts
    }

    pub fn contacts_mut(&mut self) -> &mut ContactAggregator {
        &mut self.contacts
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Link the contact provider, then load its contacts.
    ///
    /// A failed contact refresh is logged but does not undo the connection.
    pub async fn connect_contacts(
        &mut self,
        surface: &mut dyn AuthSurface,
    ) -> Result<ConnectOutcome, LeadbridgeError> {
        let outcome = self.session.connect_contacts(surface).await?;
        if outcome.is_connected() {
            if let Err(e) = self.refresh_contacts().await {
                tracing::warn!("Connected, but fetching contacts failed: {}", e);
            }
        }
        Ok(outcome)
    }

    pub async fn connect_crm(
        &self,
        credentials: &CrmCredentials,
    ) -> Result<UserProfile, LeadbridgeError> {
        self.session.connect_crm(credentials).await
    }

    /// Reload remote contacts from the backend.
    pub async fn refresh_contacts(&mut self) -> Result<usize, LeadbridgeError> {
        let result = self
            .contacts
            .fetch_remote(&self.api, &self.config.endpoints.contacts_list)
            .await;
        self.observe(result)
    }

    /// Disconnect the contact provider and drop its contacts.
    pub async fn disconnect_contacts(&mut self) -> Result<(), LeadbridgeError> {
        self.session.disconnect_contacts().await?;
        self.contacts.clear_remote();
        Ok(())
    }

    pub async fn disconnect_crm(&self) -> Result<(), LeadbridgeError> {
        self.session.disconnect_crm().await
    }

    /// Log out of both providers and reset remote contacts and the selection.
    pub async fn full_logout(&mut self) -> Result<(), LeadbridgeError> {
        self.session.full_logout().await?;
        self.contacts.clear_remote();
        self.contacts.clear_selection();
        Ok(())
    }

    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>, LeadbridgeError> {
        let result = self.sync.list_pipelines().await;
        self.observe(result)
    }

    pub async fn list_statuses(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<PipelineStatus>, LeadbridgeError> {
        let result = self.sync.list_statuses(pipeline_id).await;
        self.observe(result)
    }

    /// Dispatch the effective sync set to a pipeline stage.
    pub async fn sync(
        &self,
        pipeline_id: &str,
        status_id: Option<&str>,
    ) -> Result<SyncReport, LeadbridgeError> {
        let job = SyncJob::new(
            pipeline_id,
            status_id.map(str::to_string),
            self.contacts.effective_sync_set(),
        )
        .with_selection(self.contacts.selected_ids());
        let result = self.sync.dispatch_job(job).await;
        self.observe(result)
    }

    fn observe<T>(&self, result: Result<T, LeadbridgeError>) -> Result<T, LeadbridgeError> {
        if let Err(e) = &result {
            self.session.note_error(e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credential, ProviderId};
    use crate::store::MemoryStore;

    fn workspace() -> Workspace {
        Workspace::with_backend(ClientConfig::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_new_workspace_is_disconnected() {
        let workspace = workspace();
        let state = workspace.state();
        assert!(!state.any_connected());
        assert!(workspace.contacts().is_empty());
    }

    #[test]
    fn test_state_follows_store_writes() {
        let workspace = workspace();
        workspace
            .store()
            .put(&Credential::new(ProviderId::Contacts, "active"))
            .unwrap();
        assert!(workspace.state().contacts_connected);

        workspace.store().clear(ProviderId::Contacts).unwrap();
        assert!(!workspace.state().contacts_connected);
    }

    #[tokio::test]
    async fn test_sync_validation_happens_before_network() {
        let workspace = workspace();
        let err = workspace.sync("7", None).await.unwrap_err();
        assert!(matches!(err, LeadbridgeError::Validation { .. }));
    }
}
