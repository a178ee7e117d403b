pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_api::middleware::require_auth;
use courier_api::{AppState, AppStateInner, auth, chats, messages, users};
use courier_db::Database;
use courier_filter::UsernameFilter;
use courier_gateway::{ConnectionRegistry, Gateway, JwtIdentity, handle_session};

use crate::config::Config;

/// Process-scoped state shared by HTTP handlers and live sessions.
#[derive(Clone)]
pub struct Services {
    pub app: AppState,
    pub gateway: Gateway,
}

impl Services {
    pub fn new(db: Arc<Database>, usernames: Arc<UsernameFilter>, config: &Config) -> Self {
        let identity = Arc::new(JwtIdentity::new(config.jwt_secret.clone(), config.token_ttl));
        let gateway = Gateway::new(
            db.clone(),
            ConnectionRegistry::new(),
            identity.clone(),
            config.heartbeat,
        );
        let app = Arc::new(AppStateInner {
            db,
            usernames,
            identity,
        });
        Self { app, gateway }
    }

    /// Open the database, load the username filter and resync it from the
    /// users table.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let db = Arc::new(Database::open(&config.db_path)?);

        let usernames = UsernameFilter::load(config.filter.clone());
        let existing = db.all_usernames()?;
        usernames.rebuild(&existing);

        Ok(Self::new(db, Arc::new(usernames), config))
    }
}

pub fn build_router(services: &Services) -> Router {
    let app_state = services.app.clone();

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/users/check-username/{username}", get(users::check_username))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/users/me", get(users::me))
        .route("/users/me/username", put(users::claim_username))
        .route("/chats", post(chats::create_chat).get(chats::list_chats))
        .route(
            "/chats/{chat_id}",
            patch(chats::rename_chat).delete(chats::delete_chat),
        )
        .route("/chats/{chat_id}/participants", post(chats::add_participant))
        .route(
            "/chats/{chat_id}/participants/{user_id}",
            delete(chats::remove_participant),
        )
        .route(
            "/chats/{chat_id}/participants/{user_id}/nickname",
            put(chats::set_nickname),
        )
        .route("/chats/{chat_id}/clear", post(chats::clear_history))
        .route("/chats/{chat_id}/messages", get(messages::list_history))
        .route("/chats/{chat_id}/read", post(messages::mark_read))
        .route(
            "/messages/{message_id}",
            patch(messages::update_message).delete(messages::delete_message),
        )
        .route("/messages/{message_id}/pin", put(messages::pin_message))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/messages/ws", get(ws_upgrade))
        .with_state(services.gateway.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// The token travels in the query string; browsers cannot set headers on
/// a WebSocket handshake.
async fn ws_upgrade(
    State(gateway): State<Gateway>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, params.token, gateway))
}

/// Resolves on ctrl-c, after asking every live session to close.
pub async fn shutdown_signal(registry: ConnectionRegistry) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    let closed = registry.drain().await;
    info!("Shutting down, closed {} live session(s)", closed);
}
