//! # Leadbridge Core
//!
//! Core library for linking a contact provider and a CRM, and pushing
//! contacts into the CRM as leads.
//!
//! This crate provides:
//! - A credential store over pluggable key-value backends
//! - An HTTP client that refreshes an expired session once and replays the
//!   rejected request
//! - A session manager for connecting and disconnecting both providers
//! - A contact aggregator merging remote and imported contacts
//! - A sync orchestrator dispatching contacts and accounting per contact
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leadbridge_core::{ClientConfig, CrmCredentials, Workspace};
//!
//! async fn sync_all(pipeline: &str) -> Result<(), leadbridge_core::LeadbridgeError> {
//!     let mut workspace = Workspace::open(ClientConfig::default())?;
//!     workspace.connect_crm(&CrmCredentials::new("ana", "secret")).await?;
//!     workspace.refresh_contacts().await?;
//!     let report = workspace.sync(pipeline, None).await?;
//!     println!("{} of {} leads created", report.successful(), report.ledger().len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod contacts;
pub mod error;
pub mod http;
pub mod model;
pub mod session;
pub mod store;
pub mod surface;
pub mod sync;
pub mod workspace;

// Re-export commonly used types at crate root
pub use model::{
    ProviderId,
    UserProfile,
    Credential,
    SessionState,
    Contact,
    ContactOrigin,
    Pipeline,
    PipelineStatus,
};

pub use store::{
    Secret,
    KeyValueStore,
    StoreBackend,
    StoreError,
    CredentialStore,
    SessionTokens,
    TokenProvider,
    MemoryStore,
    FileStore,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use config::{ClientConfig, Endpoints};

pub use error::{ErrorKind, LeadbridgeError};

pub use http::{ApiClient, ApiError, ApiRequest};

pub use session::{ConnectOutcome, CrmCredentials, SessionManager};

pub use contacts::ContactAggregator;

pub use sync::{ContactResult, Progress, SyncJob, SyncOrchestrator, SyncReport};

pub use surface::{AuthSurface, ChannelSurface, SurfaceController, SurfaceEvent};

pub use workspace::Workspace;
