//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP transport,
//! secure storage) into the storage client core. Desktop apps typically
//! enable the `desktop-shims` feature, which supplies `reqwest` and keychain
//! backed defaults from `bridge-desktop`.
//!
//! ```no_run
//! # async fn example() -> core_service::Result<()> {
//! use core_runtime::config::ClientConfigBuilder;
//! use core_service::bootstrap;
//!
//! let config = ClientConfigBuilder::from_env()?.build()?;
//! let core = bootstrap(config).await?;
//!
//! if core.session().current_user().await.is_none() {
//!     core.session().login("alice@example.com", "secret").await?;
//! }
//! let buckets = core.storage().list_buckets().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_auth::credentials::{CredentialStore, SecureCredentialStore};
use core_auth::{AuthenticatedClient, SessionManager};
use core_runtime::config::ClientConfig;
use core_runtime::events::EventBus;
use provider_storage::StorageApi;
use tracing::info;

pub use bridge_traits::{HttpClient, SecureStore};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use bridge_desktop::{KeyringSecureStore, MemorySecureStore, ReqwestHttpClient};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<ClientConfig>,
    event_bus: EventBus,
    client: Arc<AuthenticatedClient>,
    session: Arc<SessionManager>,
    storage: Arc<StorageApi>,
}

impl CoreService {
    /// Create a service persisting credentials through the configured
    /// secure store.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let credentials: Arc<dyn CredentialStore> =
            Arc::new(SecureCredentialStore::new(Arc::clone(&config.secure_store)));
        Self::with_credentials(config, credentials)
    }

    /// Create a service over an explicit credential store.
    pub fn with_credentials(
        config: ClientConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.event_buffer_size);
        let client = Arc::new(AuthenticatedClient::new(
            &config,
            credentials,
            event_bus.clone(),
        )?);
        let session = Arc::new(SessionManager::new(
            Arc::clone(&client),
            config.endpoints.clone(),
            config.login_encoding,
        ));
        let storage = Arc::new(StorageApi::new(
            Arc::clone(&client),
            config.max_upload_bytes,
        ));

        Ok(Self {
            config: Arc::new(config),
            event_bus,
            client,
            session,
            storage,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn client(&self) -> Arc<AuthenticatedClient> {
        Arc::clone(&self.client)
    }

    pub fn session(&self) -> Arc<SessionManager> {
        Arc::clone(&self.session)
    }

    pub fn storage(&self) -> Arc<StorageApi> {
        Arc::clone(&self.storage)
    }
}

/// Build the service and restore any session left in the secure store.
pub async fn bootstrap(config: ClientConfig) -> Result<CoreService> {
    let core = CoreService::new(config)?;

    match core.session().restore().await {
        Some(identity) => info!(user = identity.display_name(), "Core ready, session restored"),
        None => info!("Core ready, signed out"),
    }

    Ok(core)
}
