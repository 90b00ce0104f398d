use serde::{Deserialize, Serialize};

use crate::models::MemoKind;

// -- JWT Claims --

/// JWT claims shared across the REST middleware and the auth handlers.
/// Canonical definition lives here in plaza-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub nick: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub id: String,
    pub nick: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub id: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub id: String,
    pub nick: String,
    pub token: String,
}

/// Short-lived anti-forgery token handed to clients before a mutating
/// memo request.
#[derive(Debug, Serialize)]
pub struct ActionTokenResponse {
    pub token: String,
}

// -- Memos --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMemoRequest {
    /// Comma-delimited recipient handles; whitespace is ignored.
    pub recipients: String,
    pub body: String,
    /// Anti-forgery action token.
    pub token: String,
    /// Human-verification challenge response, when the site requires one.
    pub challenge: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MemoSummary {
    pub id: i64,
    pub counterpart_id: String,
    pub counterpart_nick: Option<String>,
    pub body: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MemoListResponse {
    pub kind: MemoKind,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub memos: Vec<MemoSummary>,
}

#[derive(Debug, Serialize)]
pub struct MemoDetailResponse {
    pub id: i64,
    pub kind: MemoKind,
    pub counterpart_id: String,
    pub counterpart_nick: Option<String>,
    pub body: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub prev_id: Option<i64>,
    pub next_id: Option<i64>,
}

/// Per-recipient outcome of a send. Deliveries after a mid-batch failure
/// are not rolled back, so each recipient reports independently.
#[derive(Debug, Serialize)]
pub struct MemoDelivery {
    pub recipient: String,
    /// Id of the created recv leg when delivery succeeded.
    pub memo_id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMemoResponse {
    pub deliveries: Vec<MemoDelivery>,
}

/// Redirect target for the caller to re-render the list it came from.
#[derive(Debug, Serialize)]
pub struct DeleteMemoResponse {
    pub kind: MemoKind,
    pub page: u32,
}

/// Polled notification state: the denormalized unread counter and the
/// handle of the most recent unread sender.
#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub unread: i64,
    pub caller: Option<String>,
}
