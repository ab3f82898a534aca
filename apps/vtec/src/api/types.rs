//! # API Request/Response Types
//!
//! This module defines the JSON structures for the record-store service.

use serde::{Deserialize, Serialize};
use vtec_core::{RecordQuery, VtecError, VtecRecord};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Store status response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub record_count: usize,
    pub operational: usize,
    /// Test, experimental and experimental-in-operational records.
    pub non_operational: usize,
    pub offices: Vec<String>,
    pub locked: bool,
}

impl StatusResponse {
    /// Summarize a record set.
    pub fn from_records(records: &[VtecRecord], locked: bool) -> Self {
        let operational = records
            .iter()
            .filter(|r| r.product_class.is_operational())
            .count();
        let mut offices: Vec<String> = records.iter().map(|r| r.officeid.clone()).collect();
        offices.sort();
        offices.dedup();
        Self {
            record_count: records.len(),
            operational,
            non_operational: records.len() - operational,
            offices,
            locked,
        }
    }
}

// =============================================================================
// STORE REQUESTS
// =============================================================================

/// `POST /records/get`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRecordsRequest {
    #[serde(default)]
    pub query: RecordQuery,
    /// Take (or keep) the store lock for `token`.
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub token: String,
}

/// `POST /records/put`: replaces the whole stored set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutRecordsRequest {
    pub records: Vec<VtecRecord>,
    /// Keep the lock after writing.
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub token: String,
}

/// `POST /records/delete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRecordsRequest {
    pub records: Vec<VtecRecord>,
    #[serde(default)]
    pub token: String,
}

/// `POST /records/clear` and `POST /records/release`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub token: String,
}

// =============================================================================
// STORE RESPONSE
// =============================================================================

/// Reply to every `/records/*` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<VtecRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `VtecError::kind()` of the failure, or `locked`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// `error_kind` reported when another token holds the lock.
pub const LOCKED_KIND: &str = "locked";

impl StoreResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn with_records(records: Vec<VtecRecord>) -> Self {
        Self {
            count: Some(records.len()),
            records: Some(records),
            ..Self::ok()
        }
    }

    pub fn with_count(count: usize) -> Self {
        Self {
            count: Some(count),
            ..Self::ok()
        }
    }

    pub fn error(err: &VtecError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            ..Self::default()
        }
    }

    pub fn locked() -> Self {
        Self {
            success: false,
            error: Some("record store is locked by another client".to_string()),
            error_kind: Some(LOCKED_KIND.to_string()),
            ..Self::default()
        }
    }

    /// Rebuild the core error carried by a failed response.
    pub fn into_error(self) -> VtecError {
        let message = self.error.unwrap_or_else(|| "unknown error".to_string());
        match self.error_kind.as_deref() {
            Some("input" | "lookup") => VtecError::Input(message),
            Some("consistency") => VtecError::Consistency(message),
            Some("serialization") => VtecError::Serialization(message),
            Some("config") => VtecError::Config(message),
            _ => VtecError::Transport(message),
        }
    }
}
