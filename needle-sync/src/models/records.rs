//! Small coordination records kept in the shared store

use serde::{Deserialize, Serialize};

/// Last gated request to one upstream service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub service: String,
    pub last_request_time_ms: i64,
}

/// Last successful full sync for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCooldownRecord {
    pub user_id: String,
    pub last_sync_at_ms: i64,
}

/// Advisory per-user enrichment run lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLockRecord {
    pub token: String,
    pub acquired_at_ms: i64,
    pub expires_at_ms: i64,
}
