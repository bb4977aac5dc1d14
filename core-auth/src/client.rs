//! Authenticated HTTP client.
//!
//! Wraps the host [`HttpClient`] with bearer-token injection and a
//! refresh-and-replay-once policy for 401 responses.
//!
//! ## Request lifecycle
//!
//! 1. The stored access token (if any) is attached as
//!    `Authorization: Bearer <token>`. The header is rebuilt from the
//!    credential store on every dispatch, so a replay always carries the
//!    newest token.
//! 2. A 2xx response is returned unchanged. Any other failure, including a
//!    401 on a request that was already replayed, is surfaced without retry.
//! 3. A first 401 triggers one refresh-token exchange. On success the request
//!    is replayed exactly once with the new token. On failure, or when no
//!    refresh token is stored, all credentials are cleared,
//!    [`AuthEvent::ReauthRequired`] is emitted, and the caller receives the
//!    original 401 error.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::HttpRequest;
//!
//! let response = client.send(HttpRequest::get("/api/buckets")).await?;
//! let buckets: Vec<Bucket> = response.json()?;
//! ```

use crate::credentials::CredentialStore;
use crate::error::{AuthError, Result};
use crate::refresh::TokenRefresher;
use crate::types::{AccessToken, RequestPhase};
use bridge_traits::http::AUTHORIZATION;
use bridge_traits::{HttpClient, HttpRequest, HttpResponse};
use core_runtime::config::{resolve_url, ClientConfig};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// A request captured for possible replay.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request: HttpRequest,
    retried: bool,
    sent_with: Option<AccessToken>,
}

impl PendingRequest {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            retried: false,
            sent_with: None,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Whether this request has already been replayed after a refresh.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    fn mark_retried(&mut self) {
        self.retried = true;
    }

    /// Access token attached on the most recent dispatch.
    pub fn sent_with(&self) -> Option<&AccessToken> {
        self.sent_with.as_ref()
    }
}

/// Classify a dispatch outcome.
///
/// Only a 401 on a request that has not been replayed is `AuthExpired`;
/// transport errors, cancellations and every other status are `FailedOther`.
pub fn classify(outcome: &Result<HttpResponse>, retried: bool) -> RequestPhase {
    match outcome {
        Ok(response) if response.is_success() => RequestPhase::Succeeded,
        Ok(response) if response.is_unauthorized() && !retried => RequestPhase::AuthExpired,
        _ => RequestPhase::FailedOther,
    }
}

/// Turn a raw dispatch outcome into the caller-facing result.
fn finish(outcome: Result<HttpResponse>) -> Result<HttpResponse> {
    match outcome {
        Ok(response) if response.is_success() => Ok(response),
        Ok(response) => Err(AuthError::from_response(&response)),
        Err(err) => Err(err),
    }
}

pub struct AuthenticatedClient {
    http_client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialStore>,
    refresher: TokenRefresher,
    base_url: Url,
    default_timeout: Duration,
    event_bus: EventBus,
}

impl AuthenticatedClient {
    /// Build a client from the runtime configuration.
    pub fn new(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialStore>,
        event_bus: EventBus,
    ) -> Result<Self> {
        let refresh_url = config.resolve(&config.endpoints.refresh)?;
        let refresher = TokenRefresher::new(
            Arc::clone(&config.http_client),
            Arc::clone(&credentials),
            refresh_url,
            config.refresh_timeout,
            config.refresh_mode,
            event_bus.clone(),
        );

        info!(
            base_url = %config.base_url,
            refresh_mode = ?config.refresh_mode,
            "Authenticated client ready"
        );

        Ok(Self {
            http_client: Arc::clone(&config.http_client),
            credentials,
            refresher,
            base_url: config.base_url.clone(),
            default_timeout: config.request_timeout,
            event_bus,
        })
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Resolve a path against the base URL.
    pub fn url(&self, path: &str) -> Result<String> {
        Ok(resolve_url(&self.base_url, path)?)
    }

    /// Send a protected request.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Send a protected request that aborts when `cancel` fires.
    ///
    /// A cancelled request returns `AuthError::Cancelled` and never starts a
    /// token refresh.
    pub async fn send_cancellable(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        self.send_traced(request, cancel).await.1
    }

    /// Send a protected request and report the terminal [`RequestPhase`].
    #[instrument(skip(self, request, cancel), fields(method = %request.method, url = %request.url))]
    pub async fn send_traced(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> (RequestPhase, Result<HttpResponse>) {
        let mut pending = match self.prepare(request) {
            Ok(request) => PendingRequest::new(request),
            Err(err) => return (RequestPhase::FailedOther, Err(err)),
        };

        let token = self.current_access_token().await;
        let outcome = self.dispatch(&mut pending, token, cancel).await;

        match classify(&outcome, pending.is_retried()) {
            RequestPhase::AuthExpired => {}
            phase => return (phase, finish(outcome)),
        }

        let original_error = match finish(outcome) {
            Err(err) => err,
            Ok(_) => AuthError::Http {
                status: 401,
                detail: None,
            },
        };

        if cancel.is_cancelled() {
            return (RequestPhase::FailedOther, Err(AuthError::Cancelled));
        }

        debug!("Access token rejected, refreshing");

        match self.refresher.refresh(pending.sent_with()).await {
            Ok(outcome) => {
                pending.mark_retried();
                let replay = self
                    .dispatch(&mut pending, Some(outcome.access_token().clone()), cancel)
                    .await;

                debug!(outcome = ?classify(&replay, pending.is_retried()), "Replay finished");

                (RequestPhase::RetriedSucceeded, finish(replay))
            }
            Err(err) => {
                let phase = match err {
                    AuthError::NotAuthenticated => RequestPhase::ReauthRequired,
                    _ => RequestPhase::RetriedFailed,
                };
                self.invalidate_session(&err).await;
                (phase, Err(original_error))
            }
        }
    }

    /// Send a request without credentials and without the refresh flow.
    /// Used for login and signup.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn send_public(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut pending = PendingRequest::new(self.prepare(request)?);
        let outcome = self
            .dispatch(&mut pending, None, &CancellationToken::new())
            .await;
        finish(outcome)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(HttpRequest::get(path)).await?;
        parse_json(&response)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = HttpRequest::post(path)
            .json(body)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        let response = self.send(request).await?;
        parse_json(&response)
    }

    pub async fn patch_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = HttpRequest::patch(path)
            .json(body)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        let response = self.send(request).await?;
        parse_json(&response)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(HttpRequest::delete(path)).await?;
        Ok(())
    }

    fn prepare(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        request.url = self.url(&request.url)?;
        // the header is owned by the credential store
        request.remove_header(AUTHORIZATION);
        if request.timeout.is_none() {
            request.timeout = Some(self.default_timeout);
        }
        Ok(request)
    }

    async fn current_access_token(&self) -> Option<AccessToken> {
        match self.credentials.access_token().await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(err) => {
                warn!(error = %err, "Access token unreadable, sending without credentials");
                None
            }
        }
    }

    async fn dispatch(
        &self,
        pending: &mut PendingRequest,
        token: Option<AccessToken>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let mut request = pending.request.clone();
        if let Some(token) = &token {
            request.set_header(AUTHORIZATION, token.authorization_value());
        }
        pending.sent_with = token;

        let budget = request.timeout.unwrap_or(self.default_timeout);
        let operation = format!("{} {}", request.method, request.url);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%operation, "Request cancelled");
                Err(AuthError::Cancelled)
            }
            result = timeout(budget, self.http_client.execute(request)) => match result {
                Ok(Ok(response)) => {
                    debug!(status = response.status, "Response received");
                    Ok(response)
                }
                Ok(Err(err)) => Err(err.into()),
                Err(_) => Err(AuthError::OperationTimeout { operation }),
            },
        }
    }

    async fn invalidate_session(&self, cause: &AuthError) {
        warn!(error = %cause, "Session could not be renewed, clearing credentials");

        if let Err(err) = self.credentials.clear().await {
            warn!(error = %err, "Failed to clear credentials");
        }

        let reason = match cause {
            AuthError::NotAuthenticated => "no refresh token available".to_string(),
            other => other.to_string(),
        };
        let _ = self
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::ReauthRequired { reason }));
    }
}

fn parse_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    response
        .json()
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))
}
