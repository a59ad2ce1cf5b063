//! Integration tests for contact aggregation over a file-backed store.

use leadbridge_core::{
    ClientConfig, ContactOrigin, Credential, LeadbridgeError, ProviderId, StoreBackend,
    UserProfile, Workspace,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn file_config(dir: &TempDir, base_url: &str) -> ClientConfig {
    ClientConfig {
        base_url: base_url.to_string(),
        store_backend: StoreBackend::File,
        store_path: Some(dir.path().join("state").join("credentials.json")),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_session_and_imports_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir, "http://localhost:3000");

    {
        let mut workspace = Workspace::open(config.clone()).unwrap();
        workspace
            .store()
            .put(
                &Credential::new(ProviderId::Crm, "token-1")
                    .with_user(UserProfile::new("7", "ana")),
            )
            .unwrap();
        workspace
            .contacts_mut()
            .import_from_lines(["1234", "5678"])
            .unwrap();
    }

    let workspace = Workspace::open(config).unwrap();
    assert!(workspace.state().crm_connected);
    let phones: Vec<_> = workspace
        .contacts()
        .imported()
        .iter()
        .map(|c| c.phone.as_str())
        .collect();
    assert_eq!(phones, vec!["1234", "5678"]);
}

#[tokio::test]
async fn test_rejected_import_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir, "http://localhost:3000");

    {
        let mut workspace = Workspace::open(config.clone()).unwrap();
        let err = workspace
            .contacts_mut()
            .import_from_lines(["1234", "12a4"])
            .unwrap_err();
        assert!(matches!(err, LeadbridgeError::Validation { .. }));
    }

    let workspace = Workspace::open(config).unwrap();
    assert!(workspace.contacts().is_empty());
}

#[tokio::test]
async fn test_refresh_replaces_remote_and_keeps_imports() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/google/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contacts": [
                {"id": "people/1", "name": "Ana", "phoneNumber": "555"},
                {"id": "people/2", "name": "Luis", "phoneNumber": "777"}
            ]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/google/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contacts": [{"id": "people/2", "name": "Luis M.", "phoneNumber": "777"}]
        })))
        .mount(&server)
        .await;

    let mut workspace = Workspace::open(file_config(&dir, &server.uri())).unwrap();
    workspace.contacts_mut().import_from_lines(["42"]).unwrap();

    assert_eq!(workspace.refresh_contacts().await.unwrap(), 2);
    workspace.contacts_mut().toggle_selection("remote:people/1");
    workspace.contacts_mut().toggle_selection("remote:people/2");

    assert_eq!(workspace.refresh_contacts().await.unwrap(), 1);

    let contacts = workspace.contacts();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts.get("remote:people/2").unwrap().name, "Luis M.");
    assert_eq!(contacts.imported()[0].origin, ContactOrigin::Imported);
    assert_eq!(contacts.selected_ids(), vec!["remote:people/2".to_string()]);
}

#[tokio::test]
async fn test_lost_contacts_grant_is_detectable() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/google/contacts"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "No access token available"})),
        )
        .mount(&server)
        .await;

    let mut workspace = Workspace::open(file_config(&dir, &server.uri())).unwrap();
    let err = workspace.refresh_contacts().await.unwrap_err();

    assert!(err.requires_contacts_reconnect());
    assert!(!err.requires_crm_login());
}
