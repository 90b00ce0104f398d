use std::net::SocketAddr;

use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, warn};

use plaza_db::Database;
use plaza_db::models::{MemberRow, MemoListRow};
use plaza_db::points::LedgerError;
use plaza_types::api::{
    Claims, DeleteMemoResponse, MemoDelivery, MemoDetailResponse, MemoListResponse, MemoSummary,
    SendMemoRequest, SendMemoResponse, UnreadResponse,
};
use plaza_types::models::MemoKind;

use crate::auth::{AppState, SiteConfig};
use crate::error::ApiError;
use crate::guard;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub kind: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub token: String,
    /// Page to land on after the delete.
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_page() -> u32 {
    1
}

fn parse_kind(raw: Option<&str>) -> Result<MemoKind, ApiError> {
    match raw {
        None => Ok(MemoKind::Recv),
        Some(s) => MemoKind::parse(s).ok_or(ApiError::InvalidParameter("kind must be recv or send")),
    }
}

/// Splits the recipient field on commas after stripping all whitespace.
/// Duplicates are kept: a handle listed twice gets two memos and two
/// debits. Empty fragments are kept as well and fail validation like any
/// unknown handle.
fn parse_recipients(raw: &str) -> Vec<String> {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .split(',')
        .map(str::to_string)
        .collect()
}

/// The send protocol. Validation is strictly read-only and covers the whole
/// batch: any unknown/closed/blocked handle, or a balance below the total
/// cost, rejects the send before the first write. Past that gate each
/// recipient is one atomic unit (pair insert, notification flag, counter,
/// debit); a late failure leaves earlier deliveries committed and shows up
/// in that recipient's outcome instead of unwinding the batch.
pub fn dispatch_memos(
    db: &Database,
    site: &SiteConfig,
    sender: &MemberRow,
    raw_recipients: &str,
    body: &str,
    sent_ip: &str,
) -> Result<Vec<MemoDelivery>, ApiError> {
    let handles = parse_recipients(raw_recipients);

    let mut targets = Vec::with_capacity(handles.len());
    let mut rejected = Vec::new();
    for handle in &handles {
        match db.get_member(handle)? {
            Some(member) if member.reachable() => targets.push(member),
            _ => rejected.push(handle.clone()),
        }
    }
    if !rejected.is_empty() {
        return Err(ApiError::InvalidRecipients(rejected));
    }

    let total_cost = site.memo_send_point * targets.len() as i64;
    if total_cost > 0 && sender.point < total_cost {
        return Err(ApiError::InsufficientBalance {
            have: sender.point,
            need: total_cost,
        });
    }

    let mut deliveries = Vec::with_capacity(targets.len());
    for target in &targets {
        let reason = format!("Memo sent to {}({})", target.nick, target.id);
        match db.deliver_memo(&sender.id, &target.id, body, sent_ip, site.memo_send_point, &reason)
        {
            Ok(pair) => deliveries.push(MemoDelivery {
                recipient: target.id.clone(),
                memo_id: Some(pair.recv_id),
                error: None,
            }),
            Err(err) => {
                let detail = match err.downcast_ref::<LedgerError>() {
                    Some(ledger) => ledger.to_string(),
                    None => {
                        error!("memo delivery to {} failed: {err:#}", target.id);
                        "delivery failed".to_string()
                    }
                };
                deliveries.push(MemoDelivery {
                    recipient: target.id.clone(),
                    memo_id: None,
                    error: Some(detail),
                });
            }
        }
    }

    Ok(deliveries)
}

/// The view transition: ownership check, pairwise read-marking for an
/// unread recv leg, counterpart resolution and neighbor lookup.
fn read_memo(db: &Database, viewer: &str, id: i64) -> Result<MemoDetailResponse, ApiError> {
    let memo = db.get_memo(id)?.ok_or(ApiError::NotFound)?;
    if memo.owner_id() != viewer {
        return Err(ApiError::Forbidden);
    }

    // Only the recipient's first view is the read event; looking at one's
    // own sent copy never mutates read state.
    let read_at = match (memo.kind, &memo.read_at) {
        (MemoKind::Recv, None) => {
            let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
            db.mark_memo_read(&memo, &now)?;
            Some(now)
        }
        (_, stamp) => stamp.clone(),
    };

    let counterpart_id = memo.counterpart_id().to_string();
    let counterpart_nick = db.get_member(&counterpart_id)?.map(|m| m.nick);
    let neighbors = db.memo_neighbors(viewer, memo.kind, memo.id)?;

    Ok(MemoDetailResponse {
        id: memo.id,
        kind: memo.kind,
        counterpart_id,
        counterpart_nick,
        body: memo.body,
        created_at: parse_db_time(&memo.created_at),
        read_at: read_at.as_deref().map(parse_db_time),
        prev_id: neighbors.prev_id,
        next_id: neighbors.next_id,
    })
}

/// Single-leg removal on behalf of the owner; returns the kind so the
/// caller can be sent back to the list it came from.
fn remove_memo(db: &Database, requester: &str, id: i64) -> Result<MemoKind, ApiError> {
    let memo = db.get_memo(id)?.ok_or(ApiError::NotFound)?;
    if memo.owner_id() != requester {
        return Err(ApiError::Forbidden);
    }
    db.delete_memo(&memo)?;
    Ok(memo.kind)
}

// -- Handlers --

pub async fn list_memos(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(query.kind.as_deref())?;
    if query.page == 0 {
        return Err(ApiError::InvalidParameter("page must be at least 1"));
    }
    let page = query.page;
    let page_size = state.site.page_rows;

    // Run blocking store work off the async runtime
    let db_state = state.clone();
    let owner = claims.sub.clone();
    let (rows, total) = tokio::task::spawn_blocking(move || {
        let rows = db_state.db.list_memos(&owner, kind, page, page_size)?;
        let total = db_state.db.count_memos(&owner, kind)?;
        Ok::<_, anyhow::Error>((rows, total))
    })
    .await
    .map_err(join_error)??;

    let memos = rows.into_iter().map(summary_from_row).collect();
    Ok(Json(MemoListResponse {
        kind,
        page,
        page_size,
        total,
        memos,
    }))
}

pub async fn view_memo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let viewer = claims.sub.clone();
    let detail = tokio::task::spawn_blocking(move || read_memo(&db_state.db, &viewer, id))
        .await
        .map_err(join_error)??;

    Ok(Json(detail))
}

pub async fn send_memos(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMemoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !guard::verify_action_token(&state.jwt_secret, &claims.sub, &req.token) {
        return Err(ApiError::Forbidden);
    }
    if !state.challenge.verify(req.challenge.as_deref()) {
        return Err(ApiError::ChallengeFailed);
    }

    let db_state = state.clone();
    let sender_id = claims.sub.clone();
    let sent_ip = addr.ip().to_string();
    let deliveries = tokio::task::spawn_blocking(move || {
        let sender = db_state
            .db
            .get_member(&sender_id)?
            .ok_or(ApiError::Unauthenticated)?;
        dispatch_memos(
            &db_state.db,
            &db_state.site,
            &sender,
            &req.recipients,
            &req.body,
            &sent_ip,
        )
    })
    .await
    .map_err(join_error)??;

    Ok((StatusCode::CREATED, Json(SendMemoResponse { deliveries })))
}

pub async fn delete_memo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !guard::verify_action_token(&state.jwt_secret, &claims.sub, &query.token) {
        return Err(ApiError::Forbidden);
    }
    if query.page == 0 {
        return Err(ApiError::InvalidParameter("page must be at least 1"));
    }

    let db_state = state.clone();
    let requester = claims.sub.clone();
    let kind = tokio::task::spawn_blocking(move || remove_memo(&db_state.db, &requester, id))
        .await
        .map_err(join_error)??;

    Ok(Json(DeleteMemoResponse {
        kind,
        page: query.page,
    }))
}

/// The polled notification surface: the denormalized unread counter and
/// last-caller flag straight off the member row.
pub async fn unread_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let member_id = claims.sub.clone();
    let member = tokio::task::spawn_blocking(move || db_state.db.get_member(&member_id))
        .await
        .map_err(join_error)??
        .ok_or(ApiError::Unauthenticated)?;

    Ok(Json(UnreadResponse {
        unread: member.memo_unread,
        caller: (!member.memo_caller.is_empty()).then_some(member.memo_caller),
    }))
}

fn join_error(e: tokio::task::JoinError) -> ApiError {
    error!("spawn_blocking join error: {}", e);
    ApiError::Internal(anyhow::Error::new(e))
}

fn summary_from_row(row: MemoListRow) -> MemoSummary {
    MemoSummary {
        id: row.memo.id,
        counterpart_id: row.memo.counterpart_id().to_string(),
        counterpart_nick: row.counterpart_nick,
        body: row.memo.body,
        created_at: parse_db_time(&row.memo.created_at),
        read_at: row.memo.read_at.as_deref().map(parse_db_time),
    }
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse as naive UTC and convert.
fn parse_db_time(raw: &str) -> chrono::DateTime<Utc> {
    raw.parse::<chrono::DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            chrono::DateTime::default()
        })
}
