pub mod auth;
pub mod chats;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod users;

use std::sync::Arc;

use courier_db::{Database, StoreResult};
use courier_filter::UsernameFilter;
use courier_gateway::JwtIdentity;
use tracing::error;

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub usernames: Arc<UsernameFilter>,
    pub identity: Arc<JwtIdentity>,
}

/// Run a store call off the async runtime and lift its error.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}

/// Record a newly claimed username. `add` rewrites the filter's cache
/// file, so it runs on the blocking pool like any other store call.
pub(crate) async fn remember_username(state: &AppState, username: String) {
    let usernames = state.usernames.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || usernames.add(&username)).await {
        error!("Username filter update task failed: {}", e);
    }
}
