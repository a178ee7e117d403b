use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use courier_types::events::ServerFrame;

use crate::Gateway;
use crate::registry::Outbound;

/// Lifecycle of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade accepted, identity unknown.
    Connecting,
    Authenticated,
    Receiving,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Connecting, Closed)
                | (Authenticated, Receiving)
                | (Authenticated, Closed)
                | (Receiving, Closed)
        )
    }
}

/// Tracks the state of a single session and logs each step.
struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: SessionState::Connecting,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Drive one WebSocket from handshake to close.
///
/// `token` comes from the upgrade request's query string. Without a valid
/// token the socket is closed with a policy-violation code and nothing is
/// registered.
pub async fn handle_session(mut socket: WebSocket, token: Option<String>, gateway: Gateway) {
    let mut lifecycle = Lifecycle::new();

    let user_id = match authenticate(&gateway, token.as_deref()).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to authenticate, closing");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "Invalid authentication credentials".into(),
                })))
                .await;
            lifecycle.advance(SessionState::Closed);
            return;
        }
    };
    lifecycle.advance(SessionState::Authenticated);

    let (handle, mut outbound_rx) = gateway.registry.register(user_id).await;
    let conn_id = handle.conn_id();
    info!("User {} connected ({})", user_id, conn_id);
    lifecycle.advance(SessionState::Receiving);

    let (mut sender, mut receiver) = socket.split();

    // Heartbeat: the writer pings every interval, the reader records pongs.
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();
    let heartbeat_every = gateway.heartbeat;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_every);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                next = outbound_rx.recv() => {
                    match next {
                        Some(Outbound::Frame(frame)) => {
                            if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            let _ = sender
                                .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let fanout = gateway.fanout.clone();
    let reply = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    // One frame at a time keeps this sender's messages in order.
                    fanout.submit(&reply, user_id, text.as_str()).await;
                }
                Message::Binary(_) => {
                    reply.send(ServerFrame::error("Invalid data format: expected a text frame"));
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.registry.unregister(user_id, conn_id).await;
    lifecycle.advance(SessionState::Closed);
    info!("User {} disconnected ({})", user_id, conn_id);
}

/// Verify the token, then make sure the account still exists.
async fn authenticate(gateway: &Gateway, token: Option<&str>) -> Option<i64> {
    let user_id = gateway.verifier.verify(token?)?;

    let db = gateway.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user(user_id))
        .await
        .ok()?;

    match user {
        Ok(Some(_)) => Some(user_id),
        Ok(None) => {
            warn!("Token for unknown user {}", user_id);
            None
        }
        Err(e) => {
            warn!("User lookup failed during handshake: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn allowed_transitions() {
        assert!(Connecting.can_advance_to(Authenticated));
        assert!(Connecting.can_advance_to(Closed));
        assert!(Authenticated.can_advance_to(Receiving));
        assert!(Receiving.can_advance_to(Closed));
    }

    #[test]
    fn closed_is_terminal_and_auth_cannot_be_skipped() {
        for next in [Connecting, Authenticated, Receiving, Closed] {
            assert!(!Closed.can_advance_to(next));
        }
        assert!(!Connecting.can_advance_to(Receiving));
        assert!(!Receiving.can_advance_to(Authenticated));
    }
}
