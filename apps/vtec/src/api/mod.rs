//! # VTEC Record-Store Service
//!
//! This module implements the HTTP face of the record store using axum.
//! Remote clients (`RemoteStore`) call it the same way a local process
//! calls a `RecordStore`.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Record counts and lock state
//! - `POST /records/get` - Read records, optionally taking the lock
//! - `POST /records/put` - Replace the record set
//! - `POST /records/delete` - Remove matching records
//! - `POST /records/clear` - Empty the store
//! - `POST /records/release` - Drop the caller's lock
//!
//! ## Locking
//!
//! The store lock belongs to the client token that took it. Other tokens
//! get `423 Locked` until the holder writes with `lock=false`, releases,
//! or its lease expires.
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `VTEC_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: CORS off)
//! - `VTEC_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `VTEC_API_KEY`: If set, requires Bearer token authentication
//! - `VTEC_LOCK_LEASE_SECS`: Seconds a lock holder may stay silent (default: 120)

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::get_api_key_from_env;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    DeleteRecordsRequest, GetRecordsRequest, HealthResponse, LOCKED_KIND, PutRecordsRequest,
    StatusResponse, StoreResponse, TokenRequest,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use vtec_core::{RecordStore, VtecError};

/// Default lease of an idle lock holder.
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(120);

// =============================================================================
// SERVER STATE
// =============================================================================

/// The client currently holding the store lock.
#[derive(Debug, Clone)]
pub struct LockHolder {
    pub token: String,
    pub since: Instant,
}

/// The backing store plus who holds its lock.
pub struct ServiceState {
    pub store: Box<dyn RecordStore + Send>,
    pub holder: Option<LockHolder>,
}

impl ServiceState {
    /// True when a live lease belongs to a different token.
    pub fn locked_by_other(&mut self, token: &str, lease: Duration) -> bool {
        let Some(holder) = &self.holder else {
            return false;
        };
        if holder.token == token {
            return false;
        }
        if holder.since.elapsed() <= lease {
            return true;
        }
        tracing::warn!(
            event = "lock_lease_expired",
            held_for = ?holder.since.elapsed(),
            "releasing store lock of a silent client"
        );
        if let Err(e) = self.store.release_lock() {
            tracing::warn!(error = %e, "failed to release expired lock");
        }
        self.holder = None;
        false
    }
}

/// Shared server state containing the record store.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<Mutex<ServiceState>>,
    pub lease: Duration,
}

impl AppState {
    /// Create new app state around a store.
    #[must_use]
    pub fn new(store: Box<dyn RecordStore + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServiceState {
                store,
                holder: None,
            })),
            lease: DEFAULT_LOCK_LEASE,
        }
    }

    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

/// Read `VTEC_LOCK_LEASE_SECS`.
pub fn get_lock_lease_from_env() -> Duration {
    std::env::var("VTEC_LOCK_LEASE_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_LOCK_LEASE)
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Cross-origin access for browser dashboards.
///
/// Record-store clients are not browsers, so CORS stays off unless
/// `VTEC_CORS_ORIGINS` lists origins (or `*`).
fn cors_layer_from_env() -> Option<CorsLayer> {
    let origins = std::env::var("VTEC_CORS_ORIGINS").ok()?;
    let origin = if origins.trim() == "*" {
        tracing::warn!("CORS: any origin may call the record store");
        AllowOrigin::any()
    } else {
        let list: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(hv) => Some(hv),
                Err(e) => {
                    tracing::warn!("CORS: ignoring origin '{}': {}", o, e);
                    None
                }
            })
            .collect();
        if list.is_empty() {
            return None;
        }
        AllowOrigin::list(list)
    };
    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
    )
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. CORS (if configured)
/// 3. Rate limiting (if enabled)
/// 4. Authentication (if configured)
pub fn create_router(state: AppState) -> Router {

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = create_rate_limiter(rate_limit);
    if rate_limiter.is_some() {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
    } else {
        tracing::info!("Rate limiting disabled");
    }

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED; set VTEC_API_KEY to require a bearer token"
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/records/get", post(handlers::get_records_handler))
        .route("/records/put", post(handlers::put_records_handler))
        .route("/records/delete", post(handlers::delete_records_handler))
        .route("/records/clear", post(handlers::clear_handler))
        .route("/records/release", post(handlers::release_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    // Record sets can be large.
    router = router.layer(axum::extract::DefaultBodyLimit::max(64 * 1024 * 1024));
    if let Some(cors) = cors_layer_from_env() {
        router = router.layer(cors);
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve on an already bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> Result<(), VtecError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("VTEC record-store service listening on {}", addr);
    }
    axum::serve(listener, create_router(state))
        .await
        .map_err(|e| VtecError::Transport(format!("Server error: {}", e)))
}

/// Bind `addr` and serve.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), VtecError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| VtecError::Transport(format!("Bind failed: {}", e)))?;
    serve(listener, state).await
}
