//! Integration tests for connecting and disconnecting providers.
//!
//! These tests verify that the session manager:
//! - Stores the CRM session on login and leaves it alone on a failed login
//! - Resolves the contact provider login from surface events
//! - Applies the shared-token rule when disconnecting
//! - Cleans up locally even when the backend logout fails

use leadbridge_core::{
    ChannelSurface, ClientConfig, ConnectOutcome, Credential, CrmCredentials, ErrorKind,
    LeadbridgeError, MemoryStore, ProviderId, StoreBackend, TokenProvider, UserProfile, Workspace,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

const AUTH_URL: &str = "https://accounts.example.com/o/oauth2/auth?client_id=leadbridge";

fn test_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        store_backend: StoreBackend::Memory,
        auth_poll_interval_ms: 5,
        ..ClientConfig::default()
    }
}

fn workspace(config: ClientConfig) -> Workspace {
    Workspace::with_backend(config, Arc::new(MemoryStore::new())).unwrap()
}

fn login_as_ana(workspace: &Workspace) {
    workspace
        .store()
        .put(
            &Credential::new(ProviderId::Crm, "token-1")
                .with_refresh_token("refresh-1")
                .with_user(UserProfile::new("7", "ana")),
        )
        .unwrap();
}

async fn mount_auth_url(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/google"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"authUrl": AUTH_URL})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crm_login_stores_session_and_user() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"username": "ana", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "token-1",
            "refreshToken": "refresh-1",
            "user": {"id": 7, "username": "ana"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(test_config(&server));
    let user = workspace
        .connect_crm(&CrmCredentials::new("ana", "hunter2"))
        .await
        .unwrap();

    assert_eq!(user, UserProfile::new("7", "ana"));
    let state = workspace.state();
    assert!(state.crm_connected);
    assert!(!state.contacts_connected);
    assert!(state.any_connected());
    assert!(!state.fully_linked());
    assert_eq!(workspace.store().bearer_token().unwrap().expose(), "token-1");
    assert_eq!(workspace.store().refresh_token().unwrap().expose(), "refresh-1");
}

#[tokio::test]
async fn test_failed_crm_login_keeps_prior_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "Credenciales inválidas"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(test_config(&server));
    login_as_ana(&workspace);

    let err = workspace
        .connect_crm(&CrmCredentials::new("ana", "wrong"))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Credenciales inválidas");
    assert!(workspace.state().crm_connected);
    assert_eq!(workspace.store().bearer_token().unwrap().expose(), "token-1");
}

#[tokio::test]
async fn test_login_rejected_in_body_is_backend_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "message": "Usuario bloqueado"})),
        )
        .mount(&server)
        .await;

    let workspace = workspace(test_config(&server));
    let err = workspace
        .connect_crm(&CrmCredentials::new("ana", "hunter2"))
        .await
        .unwrap_err();

    assert!(matches!(err, LeadbridgeError::Backend { .. }));
    assert_eq!(err.to_string(), "Usuario bloqueado");
    assert!(!workspace.state().crm_connected);
}

#[tokio::test]
async fn test_connect_contacts_with_completion_message() {
    let server = MockServer::start().await;
    mount_auth_url(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/google/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contacts": [{"id": "people/1", "name": "Ana", "phoneNumber": "555"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let origin = config.expected_origin().unwrap();
    let mut workspace = workspace(config);

    let (mut surface, controller) = ChannelSurface::new();
    controller.post_message("https://evil.example.com", "google-auth-success");
    controller.post_message(origin, "google-auth-success");

    let outcome = workspace.connect_contacts(&mut surface).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::Connected);
    assert_eq!(controller.opened_url().unwrap().as_str(), AUTH_URL);
    assert!(surface.is_closed());
    assert!(workspace.state().contacts_connected);
    // Connecting triggers a contact refresh.
    assert_eq!(workspace.contacts().remote().len(), 1);
}

#[tokio::test]
async fn test_closed_surface_confirmed_by_readable_contacts() {
    let server = MockServer::start().await;
    mount_auth_url(&server).await;

    // Once to confirm the grant, once for the refresh that follows.
    Mock::given(method("GET"))
        .and(path("/api/google/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contacts": [{"id": "people/1", "name": "Ana", "phoneNumber": "555"}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let mut workspace = workspace(test_config(&server));
    login_as_ana(&workspace);

    let (mut surface, controller) = ChannelSurface::new();
    controller.close();

    let outcome = workspace.connect_contacts(&mut surface).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::ConfirmedAfterClose);
    assert!(workspace.state().fully_linked());
    assert_eq!(workspace.contacts().remote().len(), 1);
}

#[tokio::test]
async fn test_closed_surface_with_crm_session_but_no_grant_is_cancelled() {
    let server = MockServer::start().await;
    mount_auth_url(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/google/contacts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "message": "No access token"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // The CRM session must not be mistaken for a contact provider grant.
    Mock::given(method("GET"))
        .and(path("/api/auth/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "7", "displayName": "ana"})),
        )
        .expect(0)
        .mount(&server)
        .await;

    let mut workspace = workspace(test_config(&server));
    login_as_ana(&workspace);

    let (mut surface, controller) = ChannelSurface::new();
    controller.close();

    let outcome = workspace.connect_contacts(&mut surface).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::Cancelled);
    let state = workspace.state();
    assert!(!state.contacts_connected);
    assert!(state.crm_connected);
    assert!(workspace.store().get(ProviderId::Contacts).unwrap().is_none());
}

#[tokio::test]
async fn test_closed_surface_without_session_is_cancelled() {
    let server = MockServer::start().await;
    mount_auth_url(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/google/contacts"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "No access"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut workspace = workspace(test_config(&server));

    let (mut surface, controller) = ChannelSurface::new();
    controller.post_message("https://evil.example.com", "google-auth-success");
    controller.close();

    let outcome = workspace.connect_contacts(&mut surface).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::Cancelled);
    assert!(!workspace.state().contacts_connected);
}

#[tokio::test]
async fn test_connect_contacts_times_out() {
    let server = MockServer::start().await;
    mount_auth_url(&server).await;

    let config = ClientConfig {
        auth_timeout_secs: 0,
        ..test_config(&server)
    };
    let mut workspace = workspace(config);

    let (mut surface, _controller) = ChannelSurface::new();
    let outcome = workspace.connect_contacts(&mut surface).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::TimedOut);
    assert!(surface.is_closed());
    assert!(!workspace.state().contacts_connected);
}

#[tokio::test]
async fn test_missing_auth_url_is_backend_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/google"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let mut workspace = workspace(test_config(&server));
    let (mut surface, controller) = ChannelSurface::new();

    let err = workspace.connect_contacts(&mut surface).await.unwrap_err();

    assert!(matches!(err, LeadbridgeError::Backend { .. }));
    assert!(controller.opened_url().is_none());
}

#[tokio::test]
async fn test_disconnect_crm_keeps_shared_tokens_while_contacts_connected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(test_config(&server));
    login_as_ana(&workspace);
    workspace
        .store()
        .put(&Credential::new(ProviderId::Contacts, "active"))
        .unwrap();

    workspace.disconnect_crm().await.unwrap();

    let state = workspace.state();
    assert!(!state.crm_connected);
    assert!(state.contacts_connected);
    assert!(workspace.store().get(ProviderId::Crm).unwrap().is_none());
    assert!(workspace.store().user_profile().unwrap().is_none());
    assert!(workspace.store().session_tokens().unwrap().is_some());
}

#[tokio::test]
async fn test_disconnect_crm_clears_shared_tokens_when_alone() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(test_config(&server));
    login_as_ana(&workspace);

    workspace.disconnect_crm().await.unwrap();

    assert!(!workspace.state().any_connected());
    assert!(workspace.store().session_tokens().unwrap().is_none());
}

#[tokio::test]
async fn test_disconnect_contacts_survives_logout_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/google/logout"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/google/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "c1", "name": "Ana", "phone": "555"}
        ])))
        .mount(&server)
        .await;

    let mut workspace = workspace(test_config(&server));
    login_as_ana(&workspace);
    workspace
        .store()
        .put(&Credential::new(ProviderId::Contacts, "active"))
        .unwrap();
    workspace.refresh_contacts().await.unwrap();
    workspace.contacts_mut().import_from_lines(["42"]).unwrap();

    workspace.disconnect_contacts().await.unwrap();

    let state = workspace.state();
    assert!(!state.contacts_connected);
    assert!(state.crm_connected);
    assert!(workspace.store().session_tokens().unwrap().is_some());
    assert!(workspace.contacts().remote().is_empty());
    assert_eq!(workspace.contacts().imported().len(), 1);
}

#[tokio::test]
async fn test_clearing_each_provider_reports_disconnected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let workspace = workspace(test_config(&server));
    for provider in [ProviderId::Contacts, ProviderId::Crm] {
        login_as_ana(&workspace);
        workspace
            .store()
            .put(&Credential::new(ProviderId::Contacts, "active"))
            .unwrap();

        workspace.session().disconnect(provider).await.unwrap();

        assert!(workspace.store().get(provider).unwrap().is_none());
        assert!(!workspace.state().is_connected(provider));
        assert!(workspace.state().is_connected(provider.other()));
    }
}

#[tokio::test]
async fn test_full_logout_clears_everything_but_imports() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut workspace = workspace(test_config(&server));
    login_as_ana(&workspace);
    workspace
        .store()
        .put(&Credential::new(ProviderId::Contacts, "active"))
        .unwrap();
    let imported = workspace.contacts_mut().import_from_lines(["42"]).unwrap();
    workspace.contacts_mut().toggle_selection(&imported[0].id);

    workspace.full_logout().await.unwrap();

    let state = workspace.state();
    assert!(!state.any_connected());
    assert_eq!(state.last_auth_error, None);
    assert!(workspace.store().session_tokens().unwrap().is_none());
    assert!(workspace.store().user_profile().unwrap().is_none());
    assert!(workspace.contacts().selected_ids().is_empty());
    assert_eq!(workspace.contacts().imported().len(), 1);
}

#[tokio::test]
async fn test_expired_session_is_reported_in_state() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/kommo/pipelines"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(test_config(&server));
    login_as_ana(&workspace);

    let err = workspace.list_pipelines().await.unwrap_err();

    assert!(err.requires_crm_login());
    let state = workspace.state();
    assert!(!state.crm_connected);
    assert_eq!(state.last_auth_error, Some(ErrorKind::AuthExpired));
}
