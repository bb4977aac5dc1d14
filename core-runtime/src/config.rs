//! # Client Configuration
//!
//! Builder-based configuration for the storage client core. The builder
//! collects the backend location, the host bridges and the auth tuning knobs,
//! and fails fast with actionable errors when a required capability is
//! missing.
//!
//! ## Required
//!
//! - `base_url` - Root URL of the storage service
//!
//! ## Bridges (with desktop defaults)
//!
//! - `HttpClient` - reqwest-based client under `desktop-shims`
//! - `SecureStore` - OS keychain under `desktop-shims`
//!
//! Without the `desktop-shims` feature both bridges must be injected, or
//! `build()` returns [`Error::CapabilityMissing`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{ClientConfig, RefreshMode};
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .base_url("https://storage.example.com")
//!     .request_timeout(Duration::from_secs(15))
//!     .refresh_mode(RefreshMode::SingleFlight)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{HttpClient, SecureStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
/// Client-side upload ceiling; the hosted backend rejects larger bodies.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 4 * 1024 * 1024;

pub const ENV_API_URL: &str = "STORAGE_CLIENT_API_URL";
pub const ENV_REFRESH_URL: &str = "STORAGE_CLIENT_REFRESH_URL";
pub const ENV_REFRESH_MODE: &str = "STORAGE_CLIENT_REFRESH_MODE";

/// How concurrent 401 responses share the refresh-token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Every request that hits a 401 performs its own refresh call.
    #[default]
    PerRequest,
    /// Refresh calls are serialized; a request that finds the token already
    /// rotated by another request replays without refreshing again.
    SingleFlight,
}

impl std::str::FromStr for RefreshMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "per-request" | "legacy" => Ok(Self::PerRequest),
            "single-flight" | "singleflight" => Ok(Self::SingleFlight),
            other => Err(Error::Config(format!(
                "Unknown refresh mode '{}'. Expected 'per-request' or 'single-flight'.",
                other
            ))),
        }
    }
}

/// Body encoding for the login call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginEncoding {
    /// `{"username": .., "password": ..}` as JSON
    #[default]
    Json,
    /// OAuth2 password-form style `username=..&password=..`
    Form,
}

/// Paths (or absolute URLs) of the three credential endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub login: String,
    pub signup: String,
    pub refresh: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/api/auth/login".to_string(),
            signup: "/api/auth/signup".to_string(),
            refresh: "/api/auth/refresh".to_string(),
        }
    }
}

/// Storage client configuration. Use [`ClientConfigBuilder`] to construct.
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub http_client: Arc<dyn HttpClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub endpoints: AuthEndpoints,
    /// Applied to every dispatch that does not carry its own timeout.
    pub request_timeout: Duration,
    /// Budget for one refresh-token exchange.
    pub refresh_timeout: Duration,
    pub refresh_mode: RefreshMode,
    pub login_encoding: LoginEncoding,
    pub max_upload_bytes: u64,
    pub event_buffer_size: usize,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("endpoints", &self.endpoints)
            .field("request_timeout", &self.request_timeout)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refresh_mode", &self.refresh_mode)
            .field("login_encoding", &self.login_encoding)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Resolve an endpoint path against `base_url`. Absolute `http(s)` URLs
    /// are returned unchanged.
    pub fn resolve(&self, path: &str) -> Result<String> {
        resolve_url(&self.base_url, path)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.refresh_timeout.is_zero() {
            return Err(Error::Config(
                "Refresh timeout must be greater than zero".to_string(),
            ));
        }

        if self.max_upload_bytes == 0 {
            return Err(Error::Config(
                "Maximum upload size must be greater than zero".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        for (name, path) in [
            ("login", &self.endpoints.login),
            ("signup", &self.endpoints.signup),
            ("refresh", &self.endpoints.refresh),
        ] {
            if path.trim().is_empty() {
                return Err(Error::Config(format!("The {} endpoint cannot be empty", name)));
            }
            self.resolve(path)?;
        }

        Ok(())
    }
}

/// Append `path` to `base`, keeping any path prefix on the base. Absolute
/// URLs are kept as they are; scheme-relative paths are rejected.
pub fn resolve_url(base: &Url, path: &str) -> Result<String> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Url::parse(path)
            .map(String::from)
            .map_err(|e| Error::Config(format!("Invalid URL '{}': {}", path, e)));
    }

    if path.starts_with("//") {
        return Err(Error::Config(format!(
            "Scheme-relative path '{}' is not allowed; use an absolute URL",
            path
        )));
    }

    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map(String::from)
        .map_err(|e| Error::Config(format!("Cannot resolve '{}' against {}: {}", path, base, e)))
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "Base URL must use http or https, got '{}'",
            other
        ))),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Other hosts: inject a platform-native adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout).map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: e.to_string(),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store(_service_name: Option<&str>) -> Result<Arc<dyn SecureStore>> {
    Err(Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required for credential persistence. \
                 Desktop: enable the 'desktop-shims' feature to use the OS keychain. \
                 Other hosts: inject platform-native secure storage."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store(service_name: Option<&str>) -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store = match service_name {
        Some(name) => KeyringSecureStore::with_service_name(name),
        None => KeyringSecureStore::new(),
    };
    Ok(Arc::new(store))
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    storage_namespace: Option<String>,
    endpoints: Option<AuthEndpoints>,
    request_timeout: Option<Duration>,
    refresh_timeout: Option<Duration>,
    refresh_mode: RefreshMode,
    login_encoding: LoginEncoding,
    max_upload_bytes: Option<u64>,
    event_buffer_size: Option<usize>,
}

impl ClientConfigBuilder {
    /// Seed a builder from the process environment.
    ///
    /// Reads `STORAGE_CLIENT_API_URL`, `STORAGE_CLIENT_REFRESH_URL` and
    /// `STORAGE_CLIENT_REFRESH_MODE`. Unset variables leave the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::default();

        if let Some(url) = lookup(ENV_API_URL) {
            builder = builder.base_url(url);
        }

        if let Some(refresh) = lookup(ENV_REFRESH_URL) {
            let mut endpoints = AuthEndpoints::default();
            endpoints.refresh = refresh;
            builder = builder.endpoints(endpoints);
        }

        if let Some(mode) = lookup(ENV_REFRESH_MODE) {
            builder = builder.refresh_mode(mode.parse()?);
        }

        Ok(builder)
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the HTTP transport. Defaults to reqwest under `desktop-shims`.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the credential persistence backend. Defaults to the OS keychain
    /// under `desktop-shims`.
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Keychain service name used by the default secure store.
    pub fn storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = Some(namespace.into());
        self
    }

    pub fn endpoints(mut self, endpoints: AuthEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Default: 30 seconds
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    /// Default: [`RefreshMode::PerRequest`]
    pub fn refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.refresh_mode = mode;
        self
    }

    pub fn login_encoding(mut self, encoding: LoginEncoding) -> Self {
        self.login_encoding = encoding;
        self
    }

    /// Default: 4 MiB
    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = Some(bytes);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `ClientConfig`.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when the base URL is missing or malformed, or a
    ///   value fails validation
    /// - `Error::CapabilityMissing` when a bridge was not injected and no
    ///   platform default is compiled in
    pub fn build(self) -> Result<ClientConfig> {
        let raw_url = self.base_url.ok_or_else(|| {
            Error::Config(format!(
                "Base URL is required. Use .base_url() or set {}.",
                ENV_API_URL
            ))
        })?;
        let base_url = parse_base_url(&raw_url)?;

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(request_timeout)?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store(self.storage_namespace.as_deref())?,
        };

        let config = ClientConfig {
            base_url,
            http_client,
            secure_store,
            endpoints: self.endpoints.unwrap_or_default(),
            request_timeout,
            refresh_timeout: self.refresh_timeout.unwrap_or(DEFAULT_REFRESH_TIMEOUT),
            refresh_mode: self.refresh_mode,
            login_encoding: self.login_encoding,
            max_upload_bytes: self.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
