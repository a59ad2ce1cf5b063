//! Client configuration handling.
//!
//! Configuration is read from `config.toml` in the platform configuration
//! directory. Every field has a default, so a missing file or a partial file
//! is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::LeadbridgeError;
use crate::store::StoreBackend;

const PIPELINE_ID_PLACEHOLDER: &str = "{pipeline_id}";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend base URL; endpoint paths are resolved against it.
    pub base_url: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,

    /// How often the auth surface is polled while waiting for a login.
    pub auth_poll_interval_ms: u64,

    /// Upper bound on the wait for the auth surface.
    pub auth_timeout_secs: u64,

    /// Payload of the completion message posted by the auth surface.
    pub auth_success_message: String,

    /// Origin the completion message must come from. Defaults to the origin
    /// of `base_url`.
    pub expected_origin: Option<String>,

    /// Where credentials are kept.
    pub store_backend: StoreBackend,

    /// Path of the credential file for the `file` backend.
    pub store_path: Option<PathBuf>,

    /// Logging level used when `RUST_LOG` is not set.
    pub log_level: String,

    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_secs: 30,
            auth_poll_interval_ms: 500,
            auth_timeout_secs: 300,
            auth_success_message: "google-auth-success".to_string(),
            expected_origin: None,
            store_backend: StoreBackend::default(),
            store_path: None,
            log_level: "info".to_string(),
            endpoints: Endpoints::default(),
        }
    }
}

/// Backend endpoint paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub contacts_auth_url: String,
    pub contacts_logout: String,
    pub contacts_list: String,
    pub refresh_token: String,
    pub login: String,
    pub logout: String,
    pub auth_status: String,
    pub pipelines: String,
    /// Must contain `{pipeline_id}`.
    pub pipeline_statuses: String,
    pub generate_leads: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            contacts_auth_url: "/api/google".to_string(),
            contacts_logout: "/api/google/logout".to_string(),
            contacts_list: "/api/google/contacts".to_string(),
            refresh_token: "/api/auth/refresh-token".to_string(),
            login: "/api/auth/login".to_string(),
            logout: "/api/auth/logout".to_string(),
            auth_status: "/api/auth/status".to_string(),
            pipelines: "/api/kommo/pipelines".to_string(),
            pipeline_statuses: "/api/kommo/pipelines/{pipeline_id}/statuses".to_string(),
            generate_leads: "/api/kommo/generate-leads".to_string(),
        }
    }
}

impl Endpoints {
    /// Statuses path for one pipeline, with the id percent-encoded.
    pub fn pipeline_statuses_for(&self, pipeline_id: &str) -> String {
        let encoded: String =
            url::form_urlencoded::byte_serialize(pipeline_id.as_bytes()).collect();
        self.pipeline_statuses
            .replace(PIPELINE_ID_PLACEHOLDER, &encoded)
    }
}

impl ClientConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, LeadbridgeError> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| LeadbridgeError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self, LeadbridgeError> {
        if !path.exists() {
            tracing::debug!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LeadbridgeError::config(format!("failed to read {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|d| d.config_dir().join("config.toml"))
    }

    fn validate(&self) -> Result<(), LeadbridgeError> {
        self.parsed_base_url()?;
        if !self
            .endpoints
            .pipeline_statuses
            .contains(PIPELINE_ID_PLACEHOLDER)
        {
            return Err(LeadbridgeError::config(format!(
                "endpoints.pipeline_statuses must contain {}",
                PIPELINE_ID_PLACEHOLDER
            )));
        }
        if self.auth_poll_interval_ms == 0 {
            return Err(LeadbridgeError::config(
                "auth_poll_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    /// The base URL, normalized to end with `/` so relative joins keep any
    /// path prefix.
    pub fn parsed_base_url(&self) -> Result<Url, LeadbridgeError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| {
            LeadbridgeError::config(format!("invalid base_url {:?}: {}", self.base_url, e))
        })
    }

    /// Origin the auth completion message must carry.
    pub fn expected_origin(&self) -> Result<String, LeadbridgeError> {
        if let Some(origin) = &self.expected_origin {
            return Ok(origin.trim_end_matches('/').to_string());
        }
        Ok(self.parsed_base_url()?.origin().ascii_serialization())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn auth_poll_interval(&self) -> Duration {
        Duration::from_millis(self.auth_poll_interval_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Credential file path, defaulting to the platform data directory.
    pub fn resolved_store_path(&self) -> PathBuf {
        if let Some(path) = &self.store_path {
            return path.clone();
        }
        project_dirs()
            .map(|d| d.data_dir().join("credentials.json"))
            .unwrap_or_else(|| PathBuf::from(".leadbridge/credentials.json"))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "leadbridge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.expected_origin().unwrap(), "http://localhost:3000");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.store_backend, StoreBackend::File);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "https://sync.example.com/app"
            store_backend = "memory"

            [endpoints]
            login = "/api/crm/login"
            "#,
        )
        .unwrap();

        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.endpoints.login, "/api/crm/login");
        assert_eq!(config.endpoints.logout, "/api/auth/logout");
        assert_eq!(config.auth_poll_interval_ms, 500);
        assert_eq!(
            config.parsed_base_url().unwrap().as_str(),
            "https://sync.example.com/app/"
        );
        assert_eq!(config.expected_origin().unwrap(), "https://sync.example.com");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = ClientConfig::from_toml_str("base_url = \"not a url\"");
        assert!(matches!(result, Err(LeadbridgeError::Config { .. })));
    }

    #[test]
    fn test_statuses_template_requires_placeholder() {
        let result = ClientConfig::from_toml_str(
            "[endpoints]\npipeline_statuses = \"/api/statuses\"",
        );
        assert!(matches!(result, Err(LeadbridgeError::Config { .. })));
    }

    #[test]
    fn test_pipeline_statuses_for_encodes_id() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoints.pipeline_statuses_for("42"),
            "/api/kommo/pipelines/42/statuses"
        );
        assert_eq!(
            endpoints.pipeline_statuses_for("a/b"),
            "/api/kommo/pipelines/a%2Fb/statuses"
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = ClientConfig::load_from_path(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_explicit_store_path_wins() {
        let config = ClientConfig {
            store_path: Some(PathBuf::from("/tmp/creds.json")),
            ..ClientConfig::default()
        };
        assert_eq!(config.resolved_store_path(), PathBuf::from("/tmp/creds.json"));
    }
}
