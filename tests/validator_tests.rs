use std::error::Error;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;

use talos_marketplace::config::{ImdsConfig, ValidatorConfig};
use talos_marketplace::errors::{LicenseError, SecretStoreError};
use talos_marketplace::imds::{
    ImdsClient, PRODUCT_CODES_PATH, TOKEN_HEADER, TOKEN_PATH, TOKEN_TTL_HEADER,
};
use talos_marketplace::secrets::SecretStore;
use talos_marketplace::validator::LicenseValidator;

const TEST_TOKEN: &str = "AQAEAHsE-test-token";

/// Behaviour of the fake metadata service.
#[derive(Clone)]
struct MockImds {
    /// Body of the product-codes response; `None` answers 404.
    product_codes: Option<&'static str>,
    product_codes_status: StatusCode,
    token_status: StatusCode,
    delay: Option<Duration>,
    seen_ttl: Arc<Mutex<Option<String>>>,
}

impl MockImds {
    fn with_codes(body: &'static str) -> Self {
        Self {
            product_codes: Some(body),
            product_codes_status: StatusCode::OK,
            token_status: StatusCode::OK,
            delay: None,
            seen_ttl: Arc::new(Mutex::new(None)),
        }
    }
}

async fn token_handler(State(state): State<MockImds>, headers: HeaderMap) -> Response {
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }

    let Some(ttl) = headers.get(TOKEN_TTL_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    *state.seen_ttl.lock().unwrap() = Some(ttl.to_string());

    if state.token_status.is_success() {
        (StatusCode::OK, TEST_TOKEN).into_response()
    } else {
        state.token_status.into_response()
    }
}

async fn product_codes_handler(State(state): State<MockImds>, headers: HeaderMap) -> Response {
    let token = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
    if token != Some(TEST_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !state.product_codes_status.is_success() {
        return state.product_codes_status.into_response();
    }

    match state.product_codes {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Spin up a fake metadata service on a random port.
async fn spawn_mock_imds(state: MockImds) -> String {
    let router = Router::new()
        .route(TOKEN_PATH, put(token_handler))
        .route(PRODUCT_CODES_PATH, get(product_codes_handler))
        .with_state(state);

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("server failed");
    });

    format!("http://{}", addr)
}

/// An address nothing is listening on.
async fn closed_endpoint() -> String {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[derive(Debug, thiserror::Error)]
#[error("AccessDeniedException: User is not authorized to perform GetSecretValue")]
struct AccessDenied;

#[derive(Debug)]
enum FakeResponse {
    Secret(&'static str),
    Denied,
}

/// Secret store that records how often it is called.
#[derive(Debug)]
struct FakeStore {
    response: FakeResponse,
    calls: AtomicUsize,
    last_secret_id: Mutex<Option<String>>,
}

impl FakeStore {
    fn new(response: FakeResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
            last_secret_id: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for FakeStore {
    async fn get_secret_string(&self, secret_id: &str) -> Result<String, SecretStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_secret_id.lock().unwrap() = Some(secret_id.to_string());

        match &self.response {
            FakeResponse::Secret(body) => Ok(body.to_string()),
            FakeResponse::Denied => Err(SecretStoreError::provider(AccessDenied)),
        }
    }
}

fn validator(endpoint: &str, product_code: &str, secret_name: Option<&str>) -> LicenseValidator {
    let imds = ImdsClient::new(&ImdsConfig {
        endpoint: endpoint.to_string(),
        timeout_ms: 500,
        ..Default::default()
    })
    .expect("imds client");
    let config = ValidatorConfig::new(product_code, secret_name.map(str::to_string))
        .expect("validator config");

    LicenseValidator::new(config, imds)
}

#[tokio::test]
async fn get_token_sends_ttl_header() {
    let state = MockImds::with_codes("code-a\n");
    let seen_ttl = state.seen_ttl.clone();
    let endpoint = spawn_mock_imds(state).await;

    let token = validator(&endpoint, "code-a", None)
        .get_token()
        .await
        .expect("token");

    assert_eq!(token.as_str(), TEST_TOKEN);
    assert_eq!(seen_ttl.lock().unwrap().as_deref(), Some("21600"));
}

#[tokio::test]
async fn verify_instance_accepts_listed_code() {
    let endpoint = spawn_mock_imds(MockImds::with_codes("code-a\ncode-b\n")).await;

    let verified = validator(&endpoint, "code-b", None)
        .verify_instance()
        .await
        .expect("instance should verify");

    assert!(verified);
}

#[tokio::test]
async fn verify_instance_rejects_unlisted_code() {
    let endpoint = spawn_mock_imds(MockImds::with_codes("code-a\ncode-b\n")).await;

    let err = validator(&endpoint, "code-c", None)
        .verify_instance()
        .await
        .unwrap_err();

    match &err {
        LicenseError::InvalidInstance { expected } => assert_eq!(expected, "code-c"),
        other => panic!("expected InvalidInstance, got {other:?}"),
    }
    assert!(err.to_string().contains("code-c"));
}

#[tokio::test]
async fn instance_without_product_codes_is_invalid() {
    let mut state = MockImds::with_codes("");
    state.product_codes = None;
    let endpoint = spawn_mock_imds(state).await;

    let err = validator(&endpoint, "code-a", None)
        .verify_instance()
        .await
        .unwrap_err();

    assert!(matches!(err, LicenseError::InvalidInstance { .. }));
}

#[tokio::test]
async fn unreachable_metadata_never_reaches_secret_store() {
    let endpoint = closed_endpoint().await;
    let store = FakeStore::new(FakeResponse::Secret(r#"{"key":"abc"}"#));

    let err = validator(&endpoint, "code-a", Some("prod/license"))
        .with_secret_store(store.clone())
        .validate()
        .await
        .unwrap_err();

    assert!(matches!(err, LicenseError::MetadataUnavailable(_)));
    assert!(err.is_instance_rejected());
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn slow_metadata_service_times_out() {
    let mut state = MockImds::with_codes("code-a\n");
    state.delay = Some(Duration::from_secs(3));
    let endpoint = spawn_mock_imds(state).await;

    let err = validator(&endpoint, "code-a", None)
        .verify_instance()
        .await
        .unwrap_err();

    match err {
        LicenseError::MetadataUnavailable(reason) => assert!(reason.contains("timed out")),
        other => panic!("expected MetadataUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn token_error_status_is_metadata_unavailable() {
    let mut state = MockImds::with_codes("code-a\n");
    state.token_status = StatusCode::FORBIDDEN;
    let endpoint = spawn_mock_imds(state).await;

    let err = validator(&endpoint, "code-a", None)
        .get_token()
        .await
        .unwrap_err();

    assert!(matches!(err, LicenseError::MetadataUnavailable(_)));
}

#[tokio::test]
async fn product_codes_error_status_is_metadata_unavailable() {
    let mut state = MockImds::with_codes("code-a\n");
    state.product_codes_status = StatusCode::INTERNAL_SERVER_ERROR;
    let endpoint = spawn_mock_imds(state).await;
    let store = FakeStore::new(FakeResponse::Secret(r#"{"key":"abc"}"#));

    let err = validator(&endpoint, "code-a", Some("prod/license"))
        .with_secret_store(store.clone())
        .validate()
        .await
        .unwrap_err();

    match err {
        LicenseError::MetadataUnavailable(reason) => assert!(reason.contains("500")),
        other => panic!("expected MetadataUnavailable, got {other:?}"),
    }
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn validate_without_secret_name_skips_secret_store() {
    let endpoint = spawn_mock_imds(MockImds::with_codes("code-a\n")).await;
    let store = FakeStore::new(FakeResponse::Secret(r#"{"key":"abc"}"#));

    let report = validator(&endpoint, "code-a", None)
        .with_secret_store(store.clone())
        .validate()
        .await
        .expect("validation should succeed");

    assert_eq!(report.product_code, "code-a");
    assert!(!report.has_license());
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn get_license_secret_is_none_without_secret_name() {
    let validator = validator("http://127.0.0.1:9", "code-a", None);
    assert!(validator.get_license_secret().await.unwrap().is_none());
}

#[tokio::test]
async fn validate_returns_license_secret() {
    let endpoint = spawn_mock_imds(MockImds::with_codes("code-a\ncode-b\n")).await;
    let store = FakeStore::new(FakeResponse::Secret(r#"{"key":"abc"}"#));

    let report = validator(&endpoint, "code-b", Some("prod/license"))
        .with_secret_store(store.clone())
        .validate()
        .await
        .expect("validation should succeed");

    let license = report.license.expect("license secret");
    assert_eq!(license.as_value(), &json!({ "key": "abc" }));
    assert_eq!(store.calls(), 1);
    assert_eq!(
        store.last_secret_id.lock().unwrap().as_deref(),
        Some("prod/license")
    );
}

#[tokio::test]
async fn provider_error_is_wrapped_in_secret_retrieval() {
    let endpoint = spawn_mock_imds(MockImds::with_codes("code-a\n")).await;
    let store = FakeStore::new(FakeResponse::Denied);

    let err = validator(&endpoint, "code-a", Some("prod/license"))
        .with_secret_store(store)
        .validate()
        .await
        .unwrap_err();

    let LicenseError::SecretRetrieval {
        secret_name,
        source,
    } = &err
    else {
        panic!("expected SecretRetrieval, got {err:?}");
    };
    assert_eq!(secret_name, "prod/license");

    let provider = source.provider_error().expect("provider error");
    assert!(provider.downcast_ref::<AccessDenied>().is_some());

    // Also reachable through the standard error chain.
    let chained = err
        .source()
        .and_then(|e| e.source())
        .expect("provider error in chain");
    assert!(chained.to_string().contains("AccessDeniedException"));
}

#[tokio::test]
async fn instance_check_succeeds_before_secret_failure() {
    let endpoint = spawn_mock_imds(MockImds::with_codes("code-a\n")).await;
    let store = FakeStore::new(FakeResponse::Denied);
    let validator = validator(&endpoint, "code-a", Some("prod/license")).with_secret_store(store);

    assert!(validator.verify_instance().await.expect("instance should verify"));

    let err = validator.get_license_secret().await.unwrap_err();
    assert!(matches!(err, LicenseError::SecretRetrieval { .. }));
    assert!(!err.is_instance_rejected());
}

#[tokio::test]
async fn non_json_secret_is_secret_retrieval_error() {
    let endpoint = spawn_mock_imds(MockImds::with_codes("code-a\n")).await;
    let store = FakeStore::new(FakeResponse::Secret("LIC-1234-ABCD"));

    let err = validator(&endpoint, "code-a", Some("prod/license"))
        .with_secret_store(store)
        .validate()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LicenseError::SecretRetrieval {
            source: SecretStoreError::InvalidJson(_),
            ..
        }
    ));
}

#[tokio::test]
async fn secret_name_without_store_fails() {
    let endpoint = spawn_mock_imds(MockImds::with_codes("code-a\n")).await;

    let err = validator(&endpoint, "code-a", Some("prod/license"))
        .validate()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LicenseError::SecretRetrieval {
            source: SecretStoreError::NoStore,
            ..
        }
    ));
}
