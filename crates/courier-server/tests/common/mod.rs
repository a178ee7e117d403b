#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tower::ServiceExt;

use courier_db::Database;
use courier_filter::{FilterConfig, UsernameFilter};
use courier_server::config::Config;
use courier_server::{Services, build_router};

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestApp {
    pub services: Services,
    pub router: Router,
    _dir: tempfile::TempDir,
}

/// In-memory database, a filter under a temp dir, defaults otherwise.
pub fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.jwt_secret = "test-secret".into();
    config.filter = FilterConfig {
        path: dir.path().join("usernames.bloom"),
        capacity: 1_000,
        error_rate: 0.001,
    };

    let usernames = UsernameFilter::load(config.filter.clone());
    usernames.rebuild(Vec::<String>::new());

    let db = Arc::new(Database::open_in_memory().unwrap());
    let services = Services::new(db, Arc::new(usernames), &config);
    let router = build_router(&services);
    TestApp {
        services,
        router,
        _dir: dir,
    }
}

impl TestApp {
    pub fn db(&self) -> &Database {
        &self.services.app.db
    }

    /// One HTTP round trip through the router. Returns status and JSON body
    /// (`Value::Null` for empty bodies).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Register a user over HTTP. Returns (user_id, token).
    pub async fn register(&self, phone: &str, username: Option<&str>) -> (i64, String) {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "phone_number": phone,
                    "username": username,
                    "first_name": "Test",
                    "password": "correct horse",
                    "public_key": "pk",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        (
            body["user_id"].as_i64().unwrap(),
            body["access_token"].as_str().unwrap().to_string(),
        )
    }

    /// Serve the router on an ephemeral port. Returns the ws:// base URL.
    pub async fn serve(&self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("ws://127.0.0.1:{}", addr.port())
    }
}

pub async fn ws_connect(base: &str, token: &str) -> WsStream {
    let url = format!("{}/messages/ws?token={}", base, token);
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

/// Next text frame as JSON, skipping pings. `None` on timeout or close.
pub async fn recv_json(ws: &mut WsStream) -> Option<Value> {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(3), ws.next()).await;
        match next {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Wait for the server's close frame.
pub async fn recv_close(ws: &mut WsStream) -> Option<CloseFrame> {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(3), ws.next()).await;
        match next {
            Ok(Some(Ok(Message::Close(frame)))) => return frame,
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// True if nothing but control frames arrive within `wait`.
pub async fn stays_quiet(ws: &mut WsStream, wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return true,
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(_) => return false,
        }
    }
}

pub async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

pub async fn send_json(ws: &mut WsStream, value: &Value) {
    send_text(ws, &value.to_string()).await;
}
