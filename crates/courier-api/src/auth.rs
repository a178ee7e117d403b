use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use courier_db::models::NewUser;
use courier_types::api::{LoginRequest, RegisterRequest, TokenResponse};

use crate::error::{ApiError, ApiResult};
use crate::users::{username_available, validate_username};
use crate::{AppState, blocking, remember_username};

const MIN_PASSWORD_LEN: usize = 8;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let token = register_account(&state, req).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let phone = req.phone_number.clone();
    let user = blocking(&state, move |db| db.get_user_by_phone(&phone))
        .await?
        .ok_or_else(bad_credentials)?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| ApiError::Internal(format!("stored password hash unreadable: {}", e)))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| bad_credentials())?;

    Ok(Json(token_for(&state, user.id)?))
}

/// Create the account and return a token for it. Usernames go through the
/// filter before the database is asked.
pub(crate) async fn register_account(state: &AppState, req: RegisterRequest) -> ApiResult<TokenResponse> {
    if req.phone_number.trim().is_empty() {
        return Err(ApiError::InvalidInput("phone number is required".into()));
    }
    if req.first_name.trim().is_empty() {
        return Err(ApiError::InvalidInput("first name is required".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::InvalidInput("password is too short".into()));
    }

    let phone = req.phone_number.clone();
    if blocking(state, move |db| db.get_user_by_phone(&phone)).await?.is_some() {
        return Err(ApiError::Conflict(
            "a user with this phone number is already registered".into(),
        ));
    }

    if let Some(username) = req.username.as_deref() {
        validate_username(username)?;
        if !username_available(state, username).await? {
            return Err(ApiError::Conflict("this username is already taken".into()));
        }
    }

    // Argon2 is deliberately slow; keep it off the async workers.
    let password = req.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?;

    let user = blocking(state, move |db| {
        db.create_user(&NewUser {
            phone_number: &req.phone_number,
            username: req.username.as_deref(),
            first_name: &req.first_name,
            last_name: req.last_name.as_deref(),
            password_hash: &password_hash,
            public_key: &req.public_key,
        })
    })
    .await?;

    if let Some(username) = user.username.clone() {
        remember_username(state, username).await;
    }
    info!("Registered user {}", user.id);

    token_for(state, user.id)
}

fn token_for(state: &AppState, user_id: i64) -> ApiResult<TokenResponse> {
    let access_token = state.identity.issue(user_id)?;
    Ok(TokenResponse {
        user_id,
        access_token,
        token_type: "bearer".into(),
    })
}

fn bad_credentials() -> ApiError {
    ApiError::Unauthorized("incorrect phone number or password".into())
}
