//! Refresh-token exchange.
//!
//! [`TokenRefresher`] performs the `POST {refresh_token}` call, validates the
//! reply and writes the new tokens to the credential store. It never clears
//! credentials itself; the caller decides what a failure means.

use crate::credentials::CredentialStore;
use crate::error::{AuthError, Result};
use crate::types::{AccessToken, RefreshToken, TokenPair};
use bridge_traits::{HttpClient, HttpRequest};
use core_runtime::config::RefreshMode;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// How a refresh attempt produced the token used for the replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This caller exchanged the refresh token.
    Exchanged(AccessToken),
    /// Another caller rotated the token while this one waited
    /// ([`RefreshMode::SingleFlight`] only).
    AlreadyRotated(AccessToken),
}

impl RefreshOutcome {
    pub fn access_token(&self) -> &AccessToken {
        match self {
            RefreshOutcome::Exchanged(token) | RefreshOutcome::AlreadyRotated(token) => token,
        }
    }
}

pub struct TokenRefresher {
    http_client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialStore>,
    refresh_url: String,
    timeout: Duration,
    mode: RefreshMode,
    in_flight: Mutex<()>,
    event_bus: EventBus,
}

impl TokenRefresher {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialStore>,
        refresh_url: impl Into<String>,
        timeout: Duration,
        mode: RefreshMode,
        event_bus: EventBus,
    ) -> Self {
        Self {
            http_client,
            credentials,
            refresh_url: refresh_url.into(),
            timeout,
            mode,
            in_flight: Mutex::new(()),
            event_bus,
        }
    }

    pub fn mode(&self) -> RefreshMode {
        self.mode
    }

    /// Obtain a fresh access token after a 401.
    ///
    /// `sent_with` is the token the failed request carried. In single-flight
    /// mode, a stored token that differs from it means another request already
    /// refreshed, and that token is returned without a new exchange.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotAuthenticated` when no refresh token is stored
    /// - `AuthError::TokenRefreshFailed` for every other failure
    pub async fn refresh(&self, sent_with: Option<&AccessToken>) -> Result<RefreshOutcome> {
        match self.mode {
            RefreshMode::PerRequest => self.exchange().await.map(RefreshOutcome::Exchanged),
            RefreshMode::SingleFlight => {
                let _guard = self.in_flight.lock().await;

                if let Ok(Some(current)) = self.credentials.access_token().await {
                    if sent_with != Some(&current) {
                        debug!("Access token already rotated by a concurrent request");
                        return Ok(RefreshOutcome::AlreadyRotated(current));
                    }
                }

                self.exchange().await.map(RefreshOutcome::Exchanged)
            }
        }
    }

    #[instrument(skip(self), fields(url = %self.refresh_url))]
    async fn exchange(&self) -> Result<AccessToken> {
        let refresh_token = match self.credentials.refresh_token().await {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                info!("No refresh token stored");
                return Err(AuthError::NotAuthenticated);
            }
            Err(e) => {
                warn!(error = %e, "Refresh token unreadable, treating as absent");
                return Err(AuthError::NotAuthenticated);
            }
        };

        let _ = self.event_bus.emit(CoreEvent::Auth(AuthEvent::TokenRefreshing));

        let pair = self.call_refresh_endpoint(&refresh_token).await?;
        let rotated = pair.refresh_token.is_some();

        self.credentials.store_tokens(&pair).await.map_err(|e| {
            warn!(error = %e, "Failed to store refreshed tokens");
            AuthError::TokenRefreshFailed(format!("could not store refreshed tokens: {}", e))
        })?;

        info!(rotated_refresh_token = rotated, "Access token refreshed");
        let _ = self.event_bus.emit(CoreEvent::Auth(AuthEvent::TokenRefreshed {
            rotated_refresh_token: rotated,
        }));

        Ok(pair.access_token)
    }

    async fn call_refresh_endpoint(&self, refresh_token: &RefreshToken) -> Result<TokenPair> {
        let request = HttpRequest::post(self.refresh_url.clone())
            .json(&RefreshRequest {
                refresh_token: refresh_token.as_str(),
            })
            .map_err(|e| AuthError::Serialization(e.to_string()))?
            .timeout(self.timeout);

        let response = match timeout(self.timeout, self.http_client.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Refresh request failed");
                return Err(AuthError::TokenRefreshFailed(e.to_string()));
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Refresh request timed out");
                return Err(AuthError::TokenRefreshFailed(format!(
                    "no response within {:?}",
                    self.timeout
                )));
            }
        };

        if !response.is_success() {
            let err = AuthError::from_response(&response);
            warn!(status = response.status, error = %err, "Refresh endpoint rejected the token");
            return Err(AuthError::TokenRefreshFailed(err.to_string()));
        }

        let pair: TokenPair = response.json().map_err(|e| {
            warn!(error = %e, "Malformed refresh response");
            AuthError::TokenRefreshFailed(format!("malformed refresh response: {}", e))
        })?;

        if pair.access_token.is_empty() {
            return Err(AuthError::TokenRefreshFailed(
                "refresh response carried an empty access token".to_string(),
            ));
        }

        // an empty rotated token would lock the session out on the next refresh
        let pair = TokenPair {
            refresh_token: pair.refresh_token.filter(|t| !t.is_empty()),
            ..pair
        };

        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::InMemoryCredentialStore;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedHttpClient {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
        last_body: std::sync::Mutex<Option<String>>,
    }

    impl FixedHttpClient {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                calls: AtomicUsize::new(0),
                last_body: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl HttpClient for FixedHttpClient {
        async fn execute(
            &self,
            request: HttpRequest,
        ) -> std::result::Result<HttpResponse, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.header_value("Authorization").is_none());
            *self.last_body.lock().unwrap() = request
                .body
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned());
            Ok(HttpResponse::new(self.status, self.body))
        }
    }

    fn refresher(
        http: Arc<FixedHttpClient>,
        credentials: Arc<InMemoryCredentialStore>,
        mode: RefreshMode,
    ) -> TokenRefresher {
        TokenRefresher::new(
            http,
            credentials,
            "https://storage.example.com/api/auth/refresh",
            Duration::from_secs(5),
            mode,
            EventBus::new(8),
        )
    }

    #[tokio::test]
    async fn test_exchange_stores_both_tokens() {
        let http = Arc::new(FixedHttpClient::new(
            200,
            r#"{"access_token":"A2","refresh_token":"R2","token_type":"bearer"}"#,
        ));
        let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
        let refresher = refresher(http.clone(), credentials.clone(), RefreshMode::PerRequest);

        let outcome = refresher.refresh(Some(&AccessToken::new("A1"))).await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Exchanged(AccessToken::new("A2")));
        assert_eq!(
            http.last_body.lock().unwrap().as_deref(),
            Some(r#"{"refresh_token":"R1"}"#)
        );
        assert_eq!(credentials.access_token().await.unwrap(), Some(AccessToken::new("A2")));
        assert_eq!(credentials.refresh_token().await.unwrap(), Some(RefreshToken::new("R2")));
    }

    #[tokio::test]
    async fn test_exchange_without_rotation_keeps_refresh_token() {
        let http = Arc::new(FixedHttpClient::new(200, r#"{"access_token":"A2","refresh_token":""}"#));
        let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
        let refresher = refresher(http, credentials.clone(), RefreshMode::PerRequest);

        refresher.refresh(None).await.unwrap();

        assert_eq!(credentials.refresh_token().await.unwrap(), Some(RefreshToken::new("R1")));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_makes_no_call() {
        let http = Arc::new(FixedHttpClient::new(200, r#"{"access_token":"A2"}"#));
        let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", None));
        let refresher = refresher(http.clone(), credentials, RefreshMode::PerRequest);

        let result = refresher.refresh(None).await;

        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
        assert_eq!(http.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_and_malformed_responses_fail() {
        for (status, body) in [
            (400, r#"{"detail":"Refresh token missing"}"#),
            (401, r#"{"detail":"Invalid refresh token"}"#),
            (200, r#"{"token":"A2"}"#),
            (200, r#"{"access_token":""}"#),
        ] {
            let http = Arc::new(FixedHttpClient::new(status, body));
            let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
            let refresher = refresher(http, credentials.clone(), RefreshMode::PerRequest);

            let result = refresher.refresh(None).await;
            assert!(
                matches!(result, Err(AuthError::TokenRefreshFailed(_))),
                "status {} body {}",
                status,
                body
            );
            // refresher never clears on its own
            assert_eq!(credentials.access_token().await.unwrap(), Some(AccessToken::new("A1")));
        }
    }

    #[tokio::test]
    async fn test_single_flight_reuses_rotated_token() {
        let http = Arc::new(FixedHttpClient::new(200, r#"{"access_token":"A3"}"#));
        let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A2", Some("R2")));
        let refresher = refresher(http.clone(), credentials, RefreshMode::SingleFlight);

        let outcome = refresher.refresh(Some(&AccessToken::new("A1"))).await.unwrap();

        assert_eq!(outcome, RefreshOutcome::AlreadyRotated(AccessToken::new("A2")));
        assert_eq!(http.calls.load(Ordering::SeqCst), 0);

        let outcome = refresher.refresh(Some(&AccessToken::new("A2"))).await.unwrap();
        assert_eq!(outcome.access_token(), &AccessToken::new("A3"));
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    }
}
