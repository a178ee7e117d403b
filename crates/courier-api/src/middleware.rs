use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use courier_gateway::IdentityVerifier;

use crate::AppState;
use crate::error::ApiError;

/// The authenticated caller, inserted by `require_auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub i64);

/// Validate the bearer token and attach the caller's id to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let user_id = state
        .identity
        .verify(bearer.token())
        .ok_or_else(|| ApiError::Unauthorized("could not validate credentials".into()))?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
