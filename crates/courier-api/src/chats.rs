use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use courier_types::api::{
    AddParticipantRequest, ClearHistoryRequest, CreateChatRequest, NicknameRequest,
    RenameChatRequest,
};
use courier_types::models::{Chat, ChatType};

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::{AppState, blocking};

#[derive(Debug, Deserialize)]
pub struct DeleteChatQuery {
    #[serde(default)]
    pub for_everyone: bool,
}

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateChatRequest>,
) -> ApiResult<impl IntoResponse> {
    // Private chats have no name of their own.
    let chat_name = match req.chat_type {
        ChatType::Group => req.chat_name.filter(|n| !n.trim().is_empty()),
        ChatType::Private => None,
    };

    let chat = blocking(&state, move |db| {
        db.create_chat(user_id, req.chat_type, &req.participant_ids, chat_name.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Chat>>> {
    let chats = blocking(&state, move |db| db.list_user_chats(user_id)).await?;
    Ok(Json(chats))
}

pub async fn rename_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<RenameChatRequest>,
) -> ApiResult<Json<Chat>> {
    let chat = blocking(&state, move |db| {
        db.rename_chat(chat_id, &req.chat_name, user_id)?;
        db.get_chat(chat_id)
    })
    .await?;
    Ok(Json(chat))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Query(query): Query<DeleteChatQuery>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| db.delete_chat(chat_id, user_id, query.for_everyone)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_participant(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<AddParticipantRequest>,
) -> ApiResult<Json<Chat>> {
    let chat = blocking(&state, move |db| {
        db.add_participant(chat_id, req.user_id, user_id)?;
        db.get_chat(chat_id)
    })
    .await?;
    Ok(Json(chat))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Path((chat_id, target_id)): Path<(i64, i64)>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| db.remove_participant(chat_id, target_id, user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_nickname(
    State(state): State<AppState>,
    Path((chat_id, target_id)): Path<(i64, i64)>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<NicknameRequest>,
) -> ApiResult<StatusCode> {
    let nickname = req.nickname.filter(|n| !n.trim().is_empty());
    blocking(&state, move |db| {
        db.set_custom_nickname(chat_id, target_id, nickname.as_deref(), user_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_history(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ClearHistoryRequest>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| db.clear_history(chat_id, user_id, req.for_everyone)).await?;
    Ok(StatusCode::NO_CONTENT)
}
