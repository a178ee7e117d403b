use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;

use courier_filter::Reservation;
use courier_types::api::{ClaimUsernameRequest, UsernameAvailability};
use courier_types::models::UserPublic;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::{AppState, blocking, remember_username};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;

pub(crate) fn validate_username(username: &str) -> ApiResult<()> {
    let len = username.chars().count();
    if len < USERNAME_MIN_LEN {
        return Err(ApiError::InvalidInput("username is too short".into()));
    }
    if len > USERNAME_MAX_LEN {
        return Err(ApiError::InvalidInput("username is too long".into()));
    }
    Ok(())
}

/// Filter first; only a "possibly taken" answer costs a database lookup.
pub(crate) async fn username_available(state: &AppState, username: &str) -> ApiResult<bool> {
    match state.usernames.reserve_check(username) {
        Reservation::DefinitelyFree => {
            debug!("Username '{}' is free per filter", username);
            Ok(true)
        }
        Reservation::PossiblyTaken => {
            let name = username.to_string();
            let exists = blocking(state, move |db| db.username_exists(&name)).await?;
            Ok(!exists)
        }
    }
}

pub async fn check_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<UsernameAvailability>> {
    if username.chars().count() < USERNAME_MIN_LEN {
        return Err(ApiError::InvalidInput("username is too short".into()));
    }

    let is_available = username_available(&state, &username).await?;
    Ok(Json(UsernameAvailability { is_available }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<UserPublic>> {
    let user = blocking(&state, move |db| db.get_user(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(Json(user.to_public()))
}

/// Set a username on an account registered without one.
pub async fn claim_username(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ClaimUsernameRequest>,
) -> ApiResult<Json<UserPublic>> {
    validate_username(&req.username)?;
    if !username_available(&state, &req.username).await? {
        return Err(ApiError::Conflict("this username is already taken".into()));
    }

    let name = req.username.clone();
    let user = blocking(&state, move |db| {
        db.set_username(user_id, &name)?;
        db.get_user(user_id)
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    remember_username(&state, req.username).await;
    Ok(Json(user.to_public()))
}
