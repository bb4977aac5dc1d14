//! End-to-end behaviour of the authenticated client against a scripted
//! service.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::storage::SecureStore;
use bridge_traits::{BridgeError, HttpClient, HttpRequest, HttpResponse};
use core_auth::credentials::CredentialStore;
use core_auth::{
    AccessToken, AuthError, AuthenticatedClient, InMemoryCredentialStore, RefreshToken,
    RequestPhase, SessionManager, TokenPair,
};
use core_runtime::config::{AuthEndpoints, ClientConfig, LoginEncoding, RefreshMode};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use mockall::mock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BASE_URL: &str = "https://storage.example.com";
const REFRESH_URL: &str = "https://storage.example.com/api/auth/refresh";

#[derive(Debug, Clone)]
struct Seen {
    url: String,
    authorization: Option<String>,
    body: Option<String>,
}

/// Replies from two queues: one for the refresh endpoint and one for
/// everything else. An exhausted queue answers 500.
#[derive(Default)]
struct ScriptedService {
    api: Mutex<VecDeque<BridgeResult<HttpResponse>>>,
    refresh: Mutex<VecDeque<BridgeResult<HttpResponse>>>,
    seen: Mutex<Vec<Seen>>,
    delay: Option<Duration>,
}

impl ScriptedService {
    fn new() -> Self {
        Self::default()
    }

    fn api(self, status: u16, body: &'static str) -> Self {
        self.api
            .lock()
            .unwrap()
            .push_back(Ok(HttpResponse::new(status, body)));
        self
    }

    fn api_error(self, err: BridgeError) -> Self {
        self.api.lock().unwrap().push_back(Err(err));
        self
    }

    fn refresh(self, status: u16, body: &'static str) -> Self {
        self.refresh
            .lock()
            .unwrap()
            .push_back(Ok(HttpResponse::new(status, body)));
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn refresh_calls(&self) -> usize {
        self.seen().iter().filter(|s| s.url == REFRESH_URL).count()
    }
}

#[async_trait]
impl HttpClient for ScriptedService {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.seen.lock().unwrap().push(Seen {
            url: request.url.clone(),
            authorization: request.header_value("authorization").map(String::from),
            body: request
                .body
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned()),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queue = if request.url == REFRESH_URL {
            &self.refresh
        } else {
            &self.api
        };
        let next = queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(HttpResponse::new(500, "script exhausted")))
    }
}

struct UnusedSecureStore;

#[async_trait]
impl SecureStore for UnusedSecureStore {
    async fn set_secret(&self, _key: &str, _value: &[u8]) -> BridgeResult<()> {
        Ok(())
    }

    async fn get_secret(&self, _key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn delete_secret(&self, _key: &str) -> BridgeResult<()> {
        Ok(())
    }
}

fn config(http: Arc<dyn HttpClient>, mode: RefreshMode) -> ClientConfig {
    ClientConfig::builder()
        .base_url(BASE_URL)
        .http_client(http)
        .secure_store(Arc::new(UnusedSecureStore))
        .refresh_mode(mode)
        .build()
        .expect("valid config")
}

fn client_with(
    service: &Arc<ScriptedService>,
    credentials: Arc<dyn CredentialStore>,
    mode: RefreshMode,
) -> (AuthenticatedClient, EventBus) {
    let events = EventBus::new(32);
    let client = AuthenticatedClient::new(
        &config(service.clone(), mode),
        credentials,
        events.clone(),
    )
    .expect("client");
    (client, events)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn reauth_signals(events: &[CoreEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CoreEvent::Auth(AuthEvent::ReauthRequired { .. })))
        .count()
}

#[tokio::test]
async fn test_success_passes_through_with_bearer() {
    let service = Arc::new(ScriptedService::new().api(200, r#"[{"id":1}]"#));
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials, RefreshMode::PerRequest);

    let (phase, result) = client
        .send_traced(HttpRequest::get("/api/buckets"), &CancellationToken::new())
        .await;

    assert_eq!(phase, RequestPhase::Succeeded);
    assert_eq!(result.unwrap().body.as_ref(), br#"[{"id":1}]"#);

    let seen = service.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].url, "https://storage.example.com/api/buckets");
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer A1"));
}

#[tokio::test]
async fn test_no_token_sends_without_header() {
    let service = Arc::new(ScriptedService::new().api(200, "{}"));
    let credentials = Arc::new(InMemoryCredentialStore::new());
    let (client, _) = client_with(&service, credentials, RefreshMode::PerRequest);

    client.send(HttpRequest::get("/api/buckets")).await.unwrap();

    assert_eq!(service.seen()[0].authorization, None);
}

#[tokio::test]
async fn test_caller_authorization_header_is_replaced() {
    let service = Arc::new(ScriptedService::new().api(200, "{}"));
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials, RefreshMode::PerRequest);

    client
        .send(HttpRequest::get("/api/buckets").bearer_token("stale"))
        .await
        .unwrap();

    assert_eq!(service.seen()[0].authorization.as_deref(), Some("Bearer A1"));
}

#[tokio::test]
async fn test_scheme_relative_path_is_rejected_before_dispatch() {
    let service = Arc::new(ScriptedService::new().api(200, "{}"));
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials, RefreshMode::PerRequest);

    let err = client
        .send(HttpRequest::get("//other.example.net/api/buckets"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Config(_)));
    assert!(service.seen().is_empty());
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_replayed_once() {
    let service = Arc::new(
        ScriptedService::new()
            .api(401, r#"{"detail":"Could not validate credentials"}"#)
            .refresh(200, r#"{"access_token":"A2","refresh_token":"R2","token_type":"bearer"}"#)
            .api(200, r#"{"payload":"P"}"#),
    );
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, events) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);
    let mut rx = events.subscribe();

    let (phase, result) = client
        .send_traced(HttpRequest::get("/api/buckets/1/files"), &CancellationToken::new())
        .await;

    assert_eq!(phase, RequestPhase::RetriedSucceeded);
    assert_eq!(result.unwrap().body.as_ref(), br#"{"payload":"P"}"#);
    assert_eq!(credentials.access_token().await.unwrap(), Some(AccessToken::new("A2")));
    assert_eq!(credentials.refresh_token().await.unwrap(), Some(RefreshToken::new("R2")));

    let seen = service.seen();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer A1"));
    assert_eq!(seen[1].url, REFRESH_URL);
    assert_eq!(seen[1].authorization, None);
    assert_eq!(seen[1].body.as_deref(), Some(r#"{"refresh_token":"R1"}"#));
    assert_eq!(seen[2].url, "https://storage.example.com/api/buckets/1/files");
    assert_eq!(seen[2].authorization.as_deref(), Some("Bearer A2"));

    let emitted = drain(&mut rx);
    assert_eq!(reauth_signals(&emitted), 0);
    assert!(emitted
        .iter()
        .any(|e| matches!(e, CoreEvent::Auth(AuthEvent::TokenRefreshed { rotated_refresh_token: true }))));
}

#[tokio::test]
async fn test_failed_refresh_clears_store_and_returns_original_401() {
    let service = Arc::new(
        ScriptedService::new()
            .api(401, r#"{"detail":"Token expired"}"#)
            .refresh(400, r#"{"detail":"Invalid refresh token"}"#),
    );
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    credentials.set_user_email("alice@example.com").await.unwrap();
    let (client, events) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);
    let mut rx = events.subscribe();

    let (phase, result) = client
        .send_traced(HttpRequest::get("/api/buckets"), &CancellationToken::new())
        .await;

    assert_eq!(phase, RequestPhase::RetriedFailed);
    match result {
        Err(AuthError::Http { status, detail }) => {
            assert_eq!(status, 401);
            assert_eq!(detail.as_deref(), Some("Token expired"));
        }
        other => panic!("expected the original 401, got {:?}", other),
    }
    assert!(credentials.is_empty().await);
    assert_eq!(reauth_signals(&drain(&mut rx)), 1);
    assert_eq!(service.seen().len(), 2);
}

#[tokio::test]
async fn test_missing_refresh_token_requires_reauth_without_refresh_call() {
    let service = Arc::new(ScriptedService::new().api(401, r#"{"detail":"Not authenticated"}"#));
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", None));
    let (client, events) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);
    let mut rx = events.subscribe();

    let (phase, result) = client
        .send_traced(HttpRequest::get("/api/buckets"), &CancellationToken::new())
        .await;

    assert_eq!(phase, RequestPhase::ReauthRequired);
    assert_eq!(result.unwrap_err().status(), Some(401));
    assert_eq!(service.refresh_calls(), 0);
    assert!(credentials.is_empty().await);
    assert_eq!(reauth_signals(&drain(&mut rx)), 1);
}

#[tokio::test]
async fn test_replay_401_is_surfaced_without_second_refresh() {
    let service = Arc::new(
        ScriptedService::new()
            .api(401, r#"{"detail":"expired"}"#)
            .refresh(200, r#"{"access_token":"A2"}"#)
            .api(401, r#"{"detail":"still rejected"}"#),
    );
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, events) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);
    let mut rx = events.subscribe();

    let result = client.send(HttpRequest::get("/api/buckets")).await;

    let err = result.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(err.user_message(), "still rejected");
    assert_eq!(service.refresh_calls(), 1);
    assert_eq!(service.seen().len(), 3);
    // the refresh itself succeeded, so the session stays
    assert_eq!(credentials.access_token().await.unwrap(), Some(AccessToken::new("A2")));
    assert_eq!(credentials.refresh_token().await.unwrap(), Some(RefreshToken::new("R1")));
    assert_eq!(reauth_signals(&drain(&mut rx)), 0);
}

#[tokio::test]
async fn test_other_failures_never_refresh() {
    for status in [400, 403, 404, 422, 500, 502] {
        let service = Arc::new(ScriptedService::new().api(status, r#"{"detail":"nope"}"#));
        let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
        let (client, _) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);

        let (phase, result) = client
            .send_traced(HttpRequest::delete("/api/files/9"), &CancellationToken::new())
            .await;

        assert_eq!(phase, RequestPhase::FailedOther, "status {}", status);
        assert_eq!(result.unwrap_err().status(), Some(status));
        assert_eq!(service.seen().len(), 1);
        assert_eq!(credentials.access_token().await.unwrap(), Some(AccessToken::new("A1")));
    }
}

#[tokio::test]
async fn test_transport_error_never_refreshes() {
    let service = Arc::new(
        ScriptedService::new().api_error(BridgeError::Connection("connection reset".into())),
    );
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);

    let result = client.send(HttpRequest::get("/api/buckets")).await;

    assert!(matches!(result, Err(AuthError::Network(_))));
    assert_eq!(service.refresh_calls(), 0);
    assert!(!credentials.is_empty().await);
}

#[tokio::test]
async fn test_cancelled_request_never_refreshes() {
    let service = Arc::new(
        ScriptedService::new()
            .api(401, r#"{"detail":"expired"}"#)
            .refresh(200, r#"{"access_token":"A2"}"#)
            .delayed(Duration::from_secs(5)),
    );
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let (phase, result) = client
        .send_traced(HttpRequest::get("/api/buckets"), &cancel)
        .await;

    assert_eq!(phase, RequestPhase::FailedOther);
    assert!(matches!(result, Err(AuthError::Cancelled)));
    assert_eq!(service.refresh_calls(), 0);
    assert_eq!(credentials.access_token().await.unwrap(), Some(AccessToken::new("A1")));
}

#[tokio::test]
async fn test_already_cancelled_request_is_not_dispatched() {
    let service = Arc::new(ScriptedService::new().api(200, "{}"));
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials, RefreshMode::PerRequest);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = client
        .send_cancellable(HttpRequest::get("/api/buckets"), &cancel)
        .await;

    assert!(matches!(result, Err(AuthError::Cancelled)));
    assert!(service.seen().is_empty());
}

#[tokio::test]
async fn test_request_timeout_is_reported() {
    let service = Arc::new(
        ScriptedService::new()
            .api(200, "{}")
            .delayed(Duration::from_secs(5)),
    );
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials, RefreshMode::PerRequest);

    let result = client
        .send(HttpRequest::get("/api/buckets").timeout(Duration::from_millis(20)))
        .await;

    assert!(matches!(result, Err(AuthError::OperationTimeout { .. })));
    assert_eq!(service.refresh_calls(), 0);
}

#[tokio::test]
async fn test_public_requests_skip_credentials_and_refresh() {
    let service = Arc::new(ScriptedService::new().api(401, r#"{"detail":"Incorrect email or password"}"#));
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);

    let err = client
        .send_public(HttpRequest::post("/api/auth/login"))
        .await
        .unwrap_err();

    assert_eq!(err.user_message(), "Incorrect email or password");
    assert_eq!(service.seen()[0].authorization, None);
    assert_eq!(service.refresh_calls(), 0);
    assert!(!credentials.is_empty().await);
}

#[tokio::test]
async fn test_per_request_mode_refreshes_for_each_concurrent_401() {
    let service = Arc::new(
        ScriptedService::new()
            .api(401, "{}")
            .api(401, "{}")
            .refresh(200, r#"{"access_token":"A2"}"#)
            .refresh(200, r#"{"access_token":"A3"}"#)
            .api(200, "{}")
            .api(200, "{}")
            .delayed(Duration::from_millis(10)),
    );
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let (client, _) = client_with(&service, credentials, RefreshMode::PerRequest);

    let (first, second) = tokio::join!(
        client.send(HttpRequest::get("/api/buckets")),
        client.send(HttpRequest::get("/api/buckets/2")),
    );

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(service.refresh_calls(), 2);
}

/// Accepts only the most recently issued access token.
struct RotatingService {
    current: Mutex<String>,
    issued: AtomicUsize,
    refresh_calls: AtomicUsize,
}

#[async_trait]
impl HttpClient for RotatingService {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        tokio::time::sleep(Duration::from_millis(10)).await;

        if request.url == REFRESH_URL {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 2;
            let token = format!("A{}", n);
            *self.current.lock().unwrap() = token.clone();
            return Ok(HttpResponse::new(
                200,
                format!(r#"{{"access_token":"{}","refresh_token":"R{}"}}"#, token, n),
            ));
        }

        let expected = format!("Bearer {}", self.current.lock().unwrap());
        if request.header_value("Authorization") == Some(expected.as_str()) {
            Ok(HttpResponse::new(200, "{}"))
        } else {
            Ok(HttpResponse::new(401, r#"{"detail":"expired"}"#))
        }
    }
}

#[tokio::test]
async fn test_single_flight_mode_shares_one_refresh() {
    let service = Arc::new(RotatingService {
        current: Mutex::new("A-server".to_string()),
        issued: AtomicUsize::new(0),
        refresh_calls: AtomicUsize::new(0),
    });
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A1", Some("R1")));
    let events = EventBus::new(32);
    let client = AuthenticatedClient::new(
        &config(service.clone(), RefreshMode::SingleFlight),
        credentials.clone(),
        events,
    )
    .unwrap();

    let (a, b, c) = tokio::join!(
        client.send(HttpRequest::get("/api/buckets")),
        client.send(HttpRequest::get("/api/buckets/1")),
        client.send(HttpRequest::get("/api/buckets/2")),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(service.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(credentials.access_token().await.unwrap(), Some(AccessToken::new("A2")));
}

mock! {
    FailingCredentials {}

    #[async_trait]
    impl CredentialStore for FailingCredentials {
        async fn access_token(&self) -> core_auth::Result<Option<AccessToken>>;
        async fn refresh_token(&self) -> core_auth::Result<Option<RefreshToken>>;
        async fn user_email(&self) -> core_auth::Result<Option<String>>;
        async fn set_access_token(&self, token: &AccessToken) -> core_auth::Result<()>;
        async fn set_refresh_token(&self, token: &RefreshToken) -> core_auth::Result<()>;
        async fn set_user_email(&self, email: &str) -> core_auth::Result<()>;
        async fn clear(&self) -> core_auth::Result<()>;
        async fn store_tokens(&self, tokens: &TokenPair) -> core_auth::Result<()>;
    }
}

#[tokio::test]
async fn test_unreadable_store_sends_without_credentials() {
    let service = Arc::new(ScriptedService::new().api(200, "{}"));
    let mut credentials = MockFailingCredentials::new();
    credentials
        .expect_access_token()
        .returning(|| Err(AuthError::SecureStorageUnavailable("keychain locked".into())));

    let (client, _) = client_with(&service, Arc::new(credentials), RefreshMode::PerRequest);

    client.send(HttpRequest::get("/api/buckets")).await.unwrap();
    assert_eq!(service.seen()[0].authorization, None);
}

#[tokio::test]
async fn test_unreadable_refresh_token_requires_reauth() {
    let service = Arc::new(ScriptedService::new().api(401, "{}"));
    let mut credentials = MockFailingCredentials::new();
    credentials
        .expect_access_token()
        .returning(|| Ok(Some(AccessToken::new("A1"))));
    credentials
        .expect_refresh_token()
        .returning(|| Err(AuthError::SecureStorageUnavailable("keychain locked".into())));
    credentials.expect_clear().times(1).returning(|| Ok(()));

    let (client, _) = client_with(&service, Arc::new(credentials), RefreshMode::PerRequest);

    let (phase, result) = client
        .send_traced(HttpRequest::get("/api/buckets"), &CancellationToken::new())
        .await;

    assert_eq!(phase, RequestPhase::ReauthRequired);
    assert_eq!(result.unwrap_err().status(), Some(401));
    assert_eq!(service.refresh_calls(), 0);
}

#[tokio::test]
async fn test_login_replaces_previous_session_tokens() {
    let service = Arc::new(ScriptedService::new().api(200, r#"{"access_token":"A_new"}"#));
    let credentials = Arc::new(InMemoryCredentialStore::with_tokens("A_old", Some("R_old")));
    credentials.set_user_email("old@example.com").await.unwrap();
    let (client, _) = client_with(&service, credentials.clone(), RefreshMode::PerRequest);
    let session = SessionManager::new(
        Arc::new(client),
        AuthEndpoints::default(),
        LoginEncoding::Json,
    );

    session.login("alice@example.com", "secret").await.unwrap();

    assert_eq!(
        credentials.access_token().await.unwrap(),
        Some(AccessToken::new("A_new"))
    );
    assert_eq!(credentials.refresh_token().await.unwrap(), None);
    assert_eq!(
        credentials.user_email().await.unwrap().as_deref(),
        Some("alice@example.com")
    );
    assert_eq!(service.seen()[0].authorization, None);
}
