use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;

use courier_types::api::{
    MarkReadRequest, MarkReadResponse, MessageResponse, PinMessageRequest, UpdateMessageRequest,
};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::{AppState, blocking};

pub const DEFAULT_PAGE: u32 = 50;
pub const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE
}

/// Newest-first history as the caller is allowed to see it.
pub async fn list_history(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    let limit = query.limit.min(MAX_PAGE);
    let offset = query.offset;

    let rows = blocking(&state, move |db| db.list_history(chat_id, user_id, limit, offset)).await?;
    Ok(Json(rows.into_iter().map(MessageResponse::from).collect()))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<Json<MarkReadResponse>> {
    let updated = blocking(&state, move |db| {
        db.mark_read(chat_id, user_id, req.up_to_message_id)
    })
    .await?;
    Ok(Json(MarkReadResponse { updated }))
}

pub async fn update_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateMessageRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let content = B64
        .decode(req.content.as_bytes())
        .map_err(|_| ApiError::InvalidInput("content is not valid base64".into()))?;

    let msg = blocking(&state, move |db| db.update_message(message_id, user_id, &content)).await?;
    Ok(Json(msg.into()))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| db.delete_message(message_id, user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pin_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<PinMessageRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let msg = blocking(&state, move |db| db.set_pinned(message_id, user_id, req.pinned)).await?;
    Ok(Json(msg.into()))
}
