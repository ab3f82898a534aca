//! Integration tests for the VTEC record-store service.
//!
//! Uses axum-test to drive the handlers without starting a real server.

// Auth tests hold the env mutex across awaits; they are serialized on purpose.
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum_test::TestServer;
use serde_json::json;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use vtec::api::{
    AppState, DeleteRecordsRequest, GetRecordsRequest, HealthResponse, LOCKED_KIND,
    PutRecordsRequest, StatusResponse, StoreResponse, TokenRequest, create_router,
};
use vtec_core::{
    Action, MemoryStore, ProductClass, RecordQuery, RecordStore, VtecError, VtecRecord,
    vtec_line,
};

/// Serializes tests that touch `VTEC_API_KEY`.
static AUTH_TEST_MUTEX: Mutex<()> = Mutex::new(());

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
        unsafe {
            std::env::remove_var("VTEC_API_KEY");
            std::env::remove_var("VTEC_CORS_ORIGINS");
        }
    }
}

fn record(geo: &str, etn: u32, class: ProductClass) -> VtecRecord {
    let mut r = VtecRecord {
        geo_id: geo.to_string(),
        officeid: "KTBW".to_string(),
        phen: "WS".to_string(),
        sig: "W".to_string(),
        etn,
        act: Action::New,
        start_time: 1_705_320_000_000,
        end_time: 1_705_363_200_000,
        issue_time: 1_705_295_400_000,
        purge_time: 1_705_338_600_000,
        ufn: false,
        seg: 1,
        pil: "WSW".to_string(),
        event_id: None,
        hdln: "WINTER STORM WARNING".to_string(),
        vtecstr: String::new(),
        product_class: class,
        hvtec: None,
    };
    r.vtecstr = vtec_line(&r);
    r
}

fn sample() -> Vec<VtecRecord> {
    vec![
        record("FLZ050", 1, ProductClass::Operational),
        record("FLZ051", 1, ProductClass::Operational),
        record("FLZ050", 2, ProductClass::Test),
    ]
}

fn server_with(store: MemoryStore, lease: Duration) -> (TestServer, TestGuard) {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
    unsafe { std::env::remove_var("VTEC_API_KEY") };
    let state = AppState::new(Box::new(store)).with_lease(lease);
    (
        TestServer::new(create_router(state)).unwrap(),
        TestGuard { _guard: guard },
    )
}

fn create_test_server() -> (TestServer, TestGuard) {
    server_with(MemoryStore::new(), Duration::from_secs(120))
}

fn create_populated_test_server() -> (TestServer, TestGuard) {
    server_with(MemoryStore::with_records(sample()), Duration::from_secs(120))
}

fn get_request(token: &str, lock: bool) -> GetRecordsRequest {
    GetRecordsRequest {
        query: RecordQuery::all(),
        lock,
        token: token.to_string(),
    }
}

fn token(token: &str) -> TokenRequest {
    TokenRequest {
        token: token.to_string(),
    }
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _guard) = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_empty_store() {
    let (server, _guard) = create_test_server();
    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.record_count, 0);
    assert!(status.offices.is_empty());
    assert!(!status.locked);
}

#[tokio::test]
async fn test_status_counts_modes() {
    let (server, _guard) = create_populated_test_server();
    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.record_count, 3);
    assert_eq!(status.operational, 2);
    assert_eq!(status.non_operational, 1);
    assert_eq!(status.offices, vec!["KTBW"]);
}

// =============================================================================
// RECORDS
// =============================================================================

#[tokio::test]
async fn test_get_records_filters_by_query() {
    let (server, _guard) = create_populated_test_server();
    let body = GetRecordsRequest {
        query: RecordQuery {
            product_class: Some(ProductClass::Test),
            ..RecordQuery::all()
        },
        ..get_request("a", false)
    };
    let response = server.post("/records/get").json(&body).await;
    response.assert_status_ok();
    let reply: StoreResponse = response.json();
    assert!(reply.success);
    let records = reply.records.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].etn, 2);
}

#[tokio::test]
async fn test_put_replaces_record_set() {
    let (server, _guard) = create_populated_test_server();
    let body = PutRecordsRequest {
        records: vec![record("FLZ052", 7, ProductClass::Operational)],
        lock: false,
        token: "a".to_string(),
    };
    let reply: StoreResponse = server.post("/records/put").json(&body).await.json();
    assert_eq!(reply.count, Some(1));

    let reply: StoreResponse = server
        .post("/records/get")
        .json(&get_request("a", false))
        .await
        .json();
    let records = reply.records.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].geo_id, "FLZ052");
}

#[tokio::test]
async fn test_delete_and_clear() {
    let (server, _guard) = create_populated_test_server();
    let body = DeleteRecordsRequest {
        records: vec![record("FLZ050", 2, ProductClass::Test)],
        token: "a".to_string(),
    };
    let reply: StoreResponse = server.post("/records/delete").json(&body).await.json();
    assert_eq!(reply.count, Some(1));

    server.post("/records/clear").json(&token("a")).await.assert_status_ok();
    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.record_count, 0);
}

// =============================================================================
// LOCKING
// =============================================================================

#[tokio::test]
async fn test_lock_excludes_other_tokens() {
    let (server, _guard) = create_populated_test_server();
    server
        .post("/records/get")
        .json(&get_request("holder", true))
        .await
        .assert_status_ok();

    let status: StatusResponse = server.get("/status").await.json();
    assert!(status.locked);

    let response = server
        .post("/records/get")
        .json(&get_request("other", true))
        .await;
    response.assert_status(StatusCode::LOCKED);
    let reply: StoreResponse = response.json();
    assert!(!reply.success);
    assert_eq!(reply.error_kind.as_deref(), Some(LOCKED_KIND));

    // Unlocked reads are never blocked.
    server
        .post("/records/get")
        .json(&get_request("other", false))
        .await
        .assert_status_ok();

    server
        .post("/records/clear")
        .json(&token("other"))
        .await
        .assert_status(StatusCode::LOCKED);
}

#[tokio::test]
async fn test_put_without_lock_releases() {
    let (server, _guard) = create_populated_test_server();
    server
        .post("/records/get")
        .json(&get_request("holder", true))
        .await
        .assert_status_ok();

    let body = PutRecordsRequest {
        records: sample(),
        lock: false,
        token: "holder".to_string(),
    };
    server.post("/records/put").json(&body).await.assert_status_ok();

    server
        .post("/records/get")
        .json(&get_request("other", true))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_release_hands_lock_over() {
    let (server, _guard) = create_test_server();
    server
        .post("/records/get")
        .json(&get_request("holder", true))
        .await
        .assert_status_ok();

    server
        .post("/records/release")
        .json(&token("other"))
        .await
        .assert_status(StatusCode::LOCKED);
    server
        .post("/records/release")
        .json(&token("holder"))
        .await
        .assert_status_ok();
    // Releasing twice is harmless.
    server
        .post("/records/release")
        .json(&token("holder"))
        .await
        .assert_status_ok();

    server
        .post("/records/get")
        .json(&get_request("other", true))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_expired_lease_frees_the_lock() {
    let (server, _guard) = server_with(MemoryStore::new(), Duration::ZERO);
    server
        .post("/records/get")
        .json(&get_request("silent", true))
        .await
        .assert_status_ok();
    tokio::time::sleep(Duration::from_millis(5)).await;

    server
        .post("/records/get")
        .json(&get_request("other", true))
        .await
        .assert_status_ok();
}

/// Memory store whose reads stall, like a file store waiting on its lock.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl RecordStore for SlowStore {
    fn get_records(&mut self, query: &RecordQuery, lock: bool) -> Result<Vec<VtecRecord>, VtecError> {
        std::thread::sleep(self.delay);
        self.inner.get_records(query, lock)
    }
    fn put_records(&mut self, records: &[VtecRecord], lock: bool) -> Result<(), VtecError> {
        self.inner.put_records(records, lock)
    }
    fn delete_records(&mut self, records: &[VtecRecord]) -> Result<usize, VtecError> {
        self.inner.delete_records(records)
    }
    fn clear(&mut self) -> Result<(), VtecError> {
        self.inner.clear()
    }
    fn release_lock(&mut self) -> Result<(), VtecError> {
        self.inner.release_lock()
    }
    fn holds_lock(&self) -> bool {
        self.inner.holds_lock()
    }
}

#[tokio::test]
async fn test_stalled_store_does_not_block_health() {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
    unsafe { std::env::remove_var("VTEC_API_KEY") };
    let _guard = TestGuard { _guard: guard };
    let store = SlowStore {
        inner: MemoryStore::with_records(sample()),
        delay: Duration::from_millis(500),
    };
    let server = TestServer::new(create_router(AppState::new(Box::new(store)))).unwrap();

    let slow = async {
        let response = server
            .post("/records/get")
            .json(&get_request("a", false))
            .await;
        (response, Instant::now())
    };
    let health = async {
        let response = server.get("/health").await;
        (response, Instant::now())
    };
    let ((slow, slow_done), (health, health_done)) = tokio::join!(slow, health);

    slow.assert_status_ok();
    health.assert_status_ok();
    assert!(health_done < slow_done);
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[tokio::test]
async fn test_invalid_record_is_rejected() {
    let (server, _guard) = create_test_server();
    let response = server
        .post("/records/put")
        .json(&json!({ "records": [{ "geoId": "FLZ050" }] }))
        .await;
    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_404_on_unknown_endpoint() {
    let (server, _guard) = create_test_server();
    server.get("/records").await.assert_status_not_found();
}

#[tokio::test]
async fn test_method_not_allowed() {
    let (server, _guard) = create_test_server();
    server
        .get("/records/get")
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

fn create_auth_test_server(api_key: &str) -> TestServer {
    // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
    unsafe { std::env::set_var("VTEC_API_KEY", api_key) };
    let state = AppState::new(Box::new(MemoryStore::new()));
    TestServer::new(create_router(state)).unwrap()
}

fn cleanup_auth_env() {
    // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
    unsafe { std::env::remove_var("VTEC_API_KEY") };
}

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let _guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let api_key = "test-secret-key-12345";
    let server = create_auth_test_server(api_key);

    let response = server
        .get("/status")
        .add_header(
            header::AUTHORIZATION,
            format!("Bearer {}", api_key).parse::<HeaderValue>().unwrap(),
        )
        .await;
    cleanup_auth_env();

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_rejects_wrong_and_missing_keys() {
    let _guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let server = create_auth_test_server("correct-key");

    let wrong = server
        .post("/records/get")
        .add_header(
            header::AUTHORIZATION,
            "Bearer wrong-key".parse::<HeaderValue>().unwrap(),
        )
        .json(&get_request("a", false))
        .await;
    let missing = server
        .post("/records/get")
        .json(&get_request("a", false))
        .await;
    let health = server.get("/health").await;
    cleanup_auth_env();

    wrong.assert_status(StatusCode::UNAUTHORIZED);
    missing.assert_status(StatusCode::UNAUTHORIZED);
    health.assert_status_ok();
}

// =============================================================================
// CORS
// =============================================================================

fn cors_test_server(origins: Option<&str>) -> (TestServer, TestGuard) {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
    unsafe {
        std::env::remove_var("VTEC_API_KEY");
        match origins {
            Some(o) => std::env::set_var("VTEC_CORS_ORIGINS", o),
            None => std::env::remove_var("VTEC_CORS_ORIGINS"),
        }
    }
    let state = AppState::new(Box::new(MemoryStore::new()));
    (
        TestServer::new(create_router(state)).unwrap(),
        TestGuard { _guard: guard },
    )
}

async fn preflight(server: &TestServer, origin: &str) -> axum_test::TestResponse {
    server
        .method(Method::OPTIONS, "/records/get")
        .add_header(header::ORIGIN, HeaderValue::from_str(origin).unwrap())
        .add_header(
            header::ACCESS_CONTROL_REQUEST_METHOD,
            HeaderValue::from_static("POST"),
        )
        .await
}

#[tokio::test]
async fn test_cors_off_by_default() {
    let (server, _guard) = cors_test_server(None);
    let response = preflight(&server, "http://dashboard.local").await;
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn test_cors_allows_listed_origins_only() {
    let (server, _guard) =
        cors_test_server(Some("http://dashboard.local, http://ops.local"));

    let listed = preflight(&server, "http://ops.local").await;
    assert_eq!(
        listed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some(&HeaderValue::from_static("http://ops.local"))
    );
    let methods = listed
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_METHODS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(methods.contains("POST"));
    assert!(!methods.contains("DELETE"));

    let other = preflight(&server, "http://elsewhere.local").await;
    assert!(
        other
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}
