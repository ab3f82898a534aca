//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.

use super::{
    AppState, LockHolder, ServiceState,
    types::{
        DeleteRecordsRequest, GetRecordsRequest, HealthResponse, PutRecordsRequest,
        StatusResponse, StoreResponse, TokenRequest,
    },
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use std::time::{Duration, Instant};
use vtec_core::{RecordQuery, VtecError};

/// HTTP status for a core error.
fn status_for(err: &VtecError) -> StatusCode {
    match err {
        VtecError::Input(_) | VtecError::Lookup { .. } => StatusCode::BAD_REQUEST,
        VtecError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        VtecError::Consistency(_) => StatusCode::CONFLICT,
        VtecError::Serialization(_) | VtecError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type Reply = (StatusCode, Json<StoreResponse>);

fn failure(err: &VtecError) -> Reply {
    tracing::warn!(error = %err, kind = err.kind(), "record store call failed");
    (status_for(err), Json(StoreResponse::error(err)))
}

fn locked() -> Reply {
    (StatusCode::LOCKED, Json(StoreResponse::locked()))
}

/// Run a store call on the blocking pool while holding the service state.
///
/// File-backed stores sleep while they wait for their lock; async workers
/// stay free for other routes meanwhile.
async fn on_store<T, F>(state: &AppState, call: F) -> Result<T, Reply>
where
    F: FnOnce(&mut ServiceState, Duration) -> T + Send + 'static,
    T: Send + 'static,
{
    let mut inner = state.inner.clone().lock_owned().await;
    let lease = state.lease;
    tokio::task::spawn_blocking(move || call(&mut inner, lease))
        .await
        .map_err(|e| failure(&VtecError::Transport(format!("store task failed: {}", e))))
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STATUS HANDLER
// =============================================================================

/// Record counts and lock state.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let result = on_store(&state, |inner, _| {
        let locked = inner.holder.is_some();
        inner
            .store
            .get_records(&RecordQuery::all(), false)
            .map(|records| StatusResponse::from_records(&records, locked))
    })
    .await;
    match result {
        Ok(Ok(status)) => (StatusCode::OK, Json(status)).into_response(),
        Ok(Err(e)) => failure(&e).into_response(),
        Err(reply) => reply.into_response(),
    }
}

// =============================================================================
// RECORD HANDLERS
// =============================================================================

/// Read records; with `lock` the caller's token takes the store lock.
pub async fn get_records_handler(
    State(state): State<AppState>,
    Json(request): Json<GetRecordsRequest>,
) -> impl IntoResponse {
    on_store(&state, move |inner, lease| {
        if request.lock && inner.locked_by_other(&request.token, lease) {
            return locked();
        }
        match inner.store.get_records(&request.query, request.lock) {
            Ok(records) => {
                if request.lock {
                    inner.holder = Some(LockHolder {
                        token: request.token,
                        since: Instant::now(),
                    });
                }
                (StatusCode::OK, Json(StoreResponse::with_records(records)))
            }
            Err(e) => failure(&e),
        }
    })
    .await
    .unwrap_or_else(|reply| reply)
}

/// Replace the record set.
pub async fn put_records_handler(
    State(state): State<AppState>,
    Json(request): Json<PutRecordsRequest>,
) -> impl IntoResponse {
    on_store(&state, move |inner, lease| {
        if inner.locked_by_other(&request.token, lease) {
            return locked();
        }
        let result = inner.store.put_records(&request.records, request.lock);
        inner.holder = inner.store.holds_lock().then(|| LockHolder {
            token: request.token,
            since: Instant::now(),
        });
        match result {
            Ok(()) => (
                StatusCode::OK,
                Json(StoreResponse::with_count(request.records.len())),
            ),
            Err(e) => failure(&e),
        }
    })
    .await
    .unwrap_or_else(|reply| reply)
}

/// Delete matching records.
pub async fn delete_records_handler(
    State(state): State<AppState>,
    Json(request): Json<DeleteRecordsRequest>,
) -> impl IntoResponse {
    on_store(&state, move |inner, lease| {
        if inner.locked_by_other(&request.token, lease) {
            return locked();
        }
        match inner.store.delete_records(&request.records) {
            Ok(removed) => (StatusCode::OK, Json(StoreResponse::with_count(removed))),
            Err(e) => failure(&e),
        }
    })
    .await
    .unwrap_or_else(|reply| reply)
}

/// Empty the store.
pub async fn clear_handler(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> impl IntoResponse {
    on_store(&state, move |inner, lease| {
        if inner.locked_by_other(&request.token, lease) {
            return locked();
        }
        match inner.store.clear() {
            Ok(()) => (StatusCode::OK, Json(StoreResponse::ok())),
            Err(e) => failure(&e),
        }
    })
    .await
    .unwrap_or_else(|reply| reply)
}

/// Release the caller's lock. Releasing an unheld lock succeeds.
pub async fn release_handler(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> impl IntoResponse {
    on_store(&state, move |inner, lease| {
        if inner.locked_by_other(&request.token, lease) {
            return locked();
        }
        if inner.holder.take().is_some()
            && let Err(e) = inner.store.release_lock()
        {
            return failure(&e);
        }
        (StatusCode::OK, Json(StoreResponse::ok()))
    })
    .await
    .unwrap_or_else(|reply| reply)
}
