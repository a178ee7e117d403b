use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::close_code;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use courier_types::events::ServerFrame;

/// What the registry can ask a session's writer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(ServerFrame),
    Close { code: u16, reason: &'static str },
}

/// Cheap, cloneable handle to one live session's outbound queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue a frame. Returns false if the session is already gone.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    pub fn close(&self, code: u16, reason: &'static str) -> bool {
        self.tx.send(Outbound::Close { code, reason }).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Maps each online user to their one active session.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// user_id -> current session
    sessions: RwLock<HashMap<i64, SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for `user_id` and return its handle plus the
    /// receiving end of its queue. An existing session for the same user is
    /// dropped from the map without being told; it keeps running until its
    /// own transport ends and then fails the `conn_id` check in `unregister`.
    pub async fn register(&self, user_id: i64) -> (SessionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            conn_id: Uuid::new_v4(),
            tx,
        };

        let previous = self
            .inner
            .sessions
            .write()
            .await
            .insert(user_id, handle.clone());

        if let Some(old) = previous {
            tracing::debug!(
                "User {} reconnected, superseding session {}",
                user_id,
                old.conn_id
            );
        }

        (handle, rx)
    }

    /// Remove the entry for `user_id`, but only if it still belongs to
    /// `conn_id`. A superseded session never evicts its replacement.
    pub async fn unregister(&self, user_id: i64, conn_id: Uuid) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get(&user_id) {
            Some(current) if current.conn_id == conn_id => {
                sessions.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: i64) -> Option<SessionHandle> {
        self.inner.sessions.read().await.get(&user_id).cloned()
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    /// Best-effort push to one user. Returns false if they are offline or
    /// their session closed underneath us.
    pub async fn send(&self, user_id: i64, frame: ServerFrame) -> bool {
        match self.lookup(user_id).await {
            Some(handle) => handle.send(frame),
            None => false,
        }
    }

    pub async fn online_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Empty the registry and ask every session to close. Used on shutdown.
    pub async fn drain(&self) -> usize {
        let drained: Vec<(i64, SessionHandle)> =
            self.inner.sessions.write().await.drain().collect();

        for (_, handle) in &drained {
            handle.close(close_code::AWAY, "server shutting down");
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn frame(text: &str) -> ServerFrame {
        ServerFrame::error(text)
    }

    #[tokio::test]
    async fn register_makes_user_reachable() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.is_online(1).await);

        let (handle, mut rx) = registry.register(1).await;
        assert!(registry.is_online(1).await);
        assert_eq!(registry.lookup(1).await.map(|h| h.conn_id()), Some(handle.conn_id()));

        assert!(registry.send(1, frame("ping")).await);
        assert_eq!(rx.recv().await, Some(Outbound::Frame(frame("ping"))));
        assert!(!registry.send(2, frame("nobody")).await);
    }

    #[tokio::test]
    async fn second_register_supersedes_first() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_rx) = registry.register(7).await;
        let (second, mut second_rx) = registry.register(7).await;

        assert_ne!(first.conn_id(), second.conn_id());
        assert_eq!(registry.online_count().await, 1);
        assert_eq!(registry.lookup(7).await.map(|h| h.conn_id()), Some(second.conn_id()));

        registry.send(7, frame("latest")).await;
        assert_eq!(second_rx.recv().await, Some(Outbound::Frame(frame("latest"))));

        // The replaced session hears nothing, not even a close.
        assert!(matches!(first_rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(!first.is_closed());
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_session() {
        let registry = ConnectionRegistry::new();
        let (first, _first_rx) = registry.register(3).await;
        let (second, _second_rx) = registry.register(3).await;

        assert!(!registry.unregister(3, first.conn_id()).await);
        assert!(registry.is_online(3).await);

        assert!(registry.unregister(3, second.conn_id()).await);
        assert!(!registry.is_online(3).await);
        assert!(!registry.unregister(3, second.conn_id()).await);
    }

    #[tokio::test]
    async fn send_to_dropped_session_reports_failure() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = registry.register(5).await;
        drop(rx);

        assert!(handle.is_closed());
        assert!(!registry.send(5, frame("lost")).await);
    }

    #[tokio::test]
    async fn drain_closes_everyone() {
        let registry = ConnectionRegistry::new();
        let (_a, mut a_rx) = registry.register(1).await;
        let (_b, mut b_rx) = registry.register(2).await;

        assert_eq!(registry.drain().await, 2);
        assert_eq!(registry.online_count().await, 0);
        assert!(matches!(
            a_rx.recv().await,
            Some(Outbound::Close { code, .. }) if code == close_code::AWAY
        ));
        assert!(matches!(b_rx.recv().await, Some(Outbound::Close { .. })));
    }

    #[tokio::test]
    async fn concurrent_registers_leave_one_entry() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.register(9).await }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(registry.online_count().await, 1);
        let current = registry.lookup(9).await.unwrap().conn_id();
        assert!(handles.iter().any(|(h, _)| h.conn_id() == current));
    }
}
