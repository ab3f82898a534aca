//! # Remote Record Store
//!
//! `RecordStore` over the HTTP record-store service.
//!
//! Every client instance carries a random token that identifies it as a
//! lock holder. A `423 Locked` reply to a locking call is retried with
//! jittered exponential backoff until the lock timeout elapses.

use crate::api::{
    DeleteRecordsRequest, GetRecordsRequest, LOCKED_KIND, PutRecordsRequest, StoreResponse,
    TokenRequest,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use vtec_core::{Backoff, RecordQuery, RecordStore, VtecError, VtecRecord};

/// Default time to wait for another client's lock.
pub const DEFAULT_REMOTE_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Client side of the record-store service.
#[derive(Debug)]
pub struct RemoteStore {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    token: String,
    lock_timeout: Duration,
    held: bool,
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

impl RemoteStore {
    /// Client for the service at `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, VtecError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VtecError::Transport(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            token: random_token(),
            lock_timeout: DEFAULT_REMOTE_LOCK_TIMEOUT,
            held: false,
        })
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// This client's lock token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// One POST; `Ok(None)` when the store is locked by someone else.
    fn post_once<B: Serialize>(&self, path: &str, body: &B) -> Result<Option<StoreResponse>, VtecError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .map_err(|e| VtecError::Transport(format!("cannot reach {}: {}", self.base_url, e)))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(VtecError::Transport(
                "unauthorized: invalid or missing API key".to_string(),
            ));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(VtecError::Transport("rate limited by record-store service".to_string()));
        }
        let reply: StoreResponse = response.json().map_err(|e| {
            VtecError::Serialization(format!("bad reply from {} ({}): {}", url, status, e))
        })?;
        if status == StatusCode::LOCKED || reply.error_kind.as_deref() == Some(LOCKED_KIND) {
            return Ok(None);
        }
        if !reply.success {
            return Err(reply.into_error());
        }
        Ok(Some(reply))
    }

    /// POST, retrying while another client holds the lock.
    fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<StoreResponse, VtecError> {
        let started = Instant::now();
        let mut backoff = Backoff::default();
        loop {
            if let Some(reply) = self.post_once(path, body)? {
                return Ok(reply);
            }
            let delay = backoff.next_delay();
            if started.elapsed() + delay > self.lock_timeout {
                return Err(VtecError::Transport(format!(
                    "timed out after {} attempts waiting for the remote store lock",
                    backoff.attempts()
                )));
            }
            tracing::debug!(path, ?delay, "remote store locked; retrying");
            std::thread::sleep(delay);
        }
    }
}

impl RecordStore for RemoteStore {
    fn get_records(&mut self, query: &RecordQuery, lock: bool) -> Result<Vec<VtecRecord>, VtecError> {
        let body = GetRecordsRequest {
            query: query.clone(),
            lock,
            token: self.token.clone(),
        };
        let reply = self.post("/records/get", &body)?;
        if lock {
            self.held = true;
        }
        Ok(reply.records.unwrap_or_default())
    }

    fn put_records(&mut self, records: &[VtecRecord], lock: bool) -> Result<(), VtecError> {
        let body = PutRecordsRequest {
            records: records.to_vec(),
            lock,
            token: self.token.clone(),
        };
        let result = self.post("/records/put", &body).map(|_| ());
        if !lock {
            self.held = false;
        }
        result
    }

    fn delete_records(&mut self, records: &[VtecRecord]) -> Result<usize, VtecError> {
        let body = DeleteRecordsRequest {
            records: records.to_vec(),
            token: self.token.clone(),
        };
        Ok(self.post("/records/delete", &body)?.count.unwrap_or(0))
    }

    fn clear(&mut self) -> Result<(), VtecError> {
        let body = TokenRequest {
            token: self.token.clone(),
        };
        self.post("/records/clear", &body).map(|_| ())
    }

    fn release_lock(&mut self) -> Result<(), VtecError> {
        let body = TokenRequest {
            token: self.token.clone(),
        };
        self.held = false;
        self.post_once("/records/release", &body).map(|_| ())
    }

    fn holds_lock(&self) -> bool {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_distinct() {
        let a = RemoteStore::new("http://127.0.0.1:1", None).expect("client");
        let b = RemoteStore::new("http://127.0.0.1:1/", None).expect("client");
        assert_ne!(a.token(), b.token());
        assert_eq!(a.token().len(), 24);
        assert_eq!(b.base_url, "http://127.0.0.1:1");
    }

    #[test]
    fn unreachable_service_is_a_transport_error() {
        let mut store = RemoteStore::new("http://127.0.0.1:1", None).expect("client");
        let err = store
            .get_records(&RecordQuery::all(), false)
            .expect_err("nothing listens on port 1");
        assert!(matches!(err, VtecError::Transport(_)));
        assert!(!store.holds_lock());
    }
}
