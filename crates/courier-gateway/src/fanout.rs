use std::sync::Arc;

use tracing::{debug, error, warn};

use courier_db::{Database, StoreError, StoreResult};
use courier_types::events::{DeliveryFrame, ServerFrame, SubmitRequest};
use courier_types::models::Message;

use crate::registry::{ConnectionRegistry, SessionHandle};

/// Persist-then-deliver for messages arriving over live sessions.
#[derive(Clone)]
pub struct Fanout {
    db: Arc<Database>,
    registry: ConnectionRegistry,
}

impl Fanout {
    pub fn new(db: Arc<Database>, registry: ConnectionRegistry) -> Self {
        Self { db, registry }
    }

    /// Handle one raw frame from `sender_id`'s session. Any rejection is
    /// reported back on `session` only; nothing is delivered in that case.
    pub async fn submit(&self, session: &SessionHandle, sender_id: i64, raw: &str) -> Option<Message> {
        let request = match SubmitRequest::from_frame(raw) {
            Ok(req) => req,
            Err(reason) => {
                debug!("User {} sent a malformed frame: {}", sender_id, reason);
                session.send(ServerFrame::error(reason));
                return None;
            }
        };

        let chat_id = request.chat_id;
        let stored = self
            .blocking(move |db| db.create_message(chat_id, sender_id, &request.content))
            .await;

        let message = match stored {
            Ok(msg) => msg,
            Err(e) => {
                if matches!(e, StoreError::Unavailable(_)) {
                    error!("Failed to store message from {} in chat {}: {}", sender_id, chat_id, e);
                }
                session.send(ServerFrame::error(e.to_string()));
                return None;
            }
        };

        self.deliver(&message).await;
        Some(message)
    }

    /// Push a persisted message to every participant who is online right
    /// now, the sender included. Returns how many sessions accepted it.
    pub async fn deliver(&self, message: &Message) -> usize {
        let chat_id = message.chat_id;
        let recipients = match self.blocking(move |db| db.resolve_recipients(chat_id)).await {
            Ok(ids) => ids,
            Err(e) => {
                // Stored already; recipients will see it on their next fetch.
                warn!("Could not resolve recipients for chat {}: {}", chat_id, e);
                return 0;
            }
        };

        let frame = ServerFrame::Delivery(DeliveryFrame::from(message));
        let mut delivered = 0;
        for user_id in recipients {
            if self.registry.send(user_id, frame.clone()).await {
                delivered += 1;
            }
        }

        debug!(
            "Message {} in chat {} delivered to {} session(s)",
            message.id, chat_id, delivered
        );
        delivered
    }

    /// Run a store call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use courier_db::models::NewUser;
    use courier_types::models::{ChatType, MessageStatus};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        db: Arc<Database>,
        registry: ConnectionRegistry,
        fanout: Fanout,
        alice: i64,
        bob: i64,
        chat_id: i64,
    }

    fn user(db: &Database, name: &str) -> i64 {
        let phone = format!("+1000{}", name);
        db.create_user(&NewUser {
            phone_number: &phone,
            username: Some(name),
            first_name: name,
            last_name: None,
            password_hash: "x",
            public_key: "pk",
        })
        .unwrap()
        .id
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let chat_id = db.create_chat(alice, ChatType::Private, &[bob], None).unwrap().id;
        let registry = ConnectionRegistry::new();
        let fanout = Fanout::new(db.clone(), registry.clone());
        Fixture {
            db,
            registry,
            fanout,
            alice,
            bob,
            chat_id,
        }
    }

    fn submit_json(chat_id: i64, b64: &str) -> String {
        format!(r#"{{"chat_id": {}, "content": "{}"}}"#, chat_id, b64)
    }

    fn expect_frame(rx: &mut UnboundedReceiver<Outbound>) -> ServerFrame {
        match rx.try_recv() {
            Ok(Outbound::Frame(frame)) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn message_reaches_sender_and_online_recipient() {
        let f = fixture();
        let (alice_session, mut alice_rx) = f.registry.register(f.alice).await;
        let (_bob_session, mut bob_rx) = f.registry.register(f.bob).await;

        // "hi"
        let msg = f
            .fanout
            .submit(&alice_session, f.alice, &submit_json(f.chat_id, "aGk="))
            .await
            .unwrap();
        assert_eq!(msg.sender_id, Some(f.alice));
        assert_eq!(msg.status, MessageStatus::Sent);

        for rx in [&mut alice_rx, &mut bob_rx] {
            match expect_frame(rx) {
                ServerFrame::Delivery(d) => {
                    assert_eq!(d.id, msg.id);
                    assert_eq!(d.chat_id, f.chat_id);
                    assert_eq!(d.content, "aGk=");
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn offline_recipient_finds_message_in_history() {
        let f = fixture();
        let (alice_session, mut alice_rx) = f.registry.register(f.alice).await;

        let msg = f
            .fanout
            .submit(&alice_session, f.alice, &submit_json(f.chat_id, "aGk="))
            .await
            .unwrap();
        assert!(matches!(expect_frame(&mut alice_rx), ServerFrame::Delivery(_)));

        let history = f.db.list_history(f.chat_id, f.bob, 50, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, msg.id);
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_and_nothing_is_stored() {
        let f = fixture();
        let (alice_session, mut alice_rx) = f.registry.register(f.alice).await;
        let (_bob_session, mut bob_rx) = f.registry.register(f.bob).await;

        assert!(f.fanout.submit(&alice_session, f.alice, "{oops").await.is_none());

        match expect_frame(&mut alice_rx) {
            ServerFrame::Error(e) => assert!(e.error.starts_with("Invalid data format")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(bob_rx.try_recv().is_err());
        assert!(f.db.list_history(f.chat_id, f.bob, 50, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn outsider_is_rejected_without_partial_delivery() {
        let f = fixture();
        let carol = user(&f.db, "carol");
        let (carol_session, mut carol_rx) = f.registry.register(carol).await;
        let (_bob_session, mut bob_rx) = f.registry.register(f.bob).await;

        let res = f
            .fanout
            .submit(&carol_session, carol, &submit_json(f.chat_id, "aGk="))
            .await;
        assert!(res.is_none());

        match expect_frame(&mut carol_rx) {
            ServerFrame::Error(e) => assert_eq!(e.error, StoreError::NotParticipant.to_string()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_recipient_does_not_block_others() {
        let f = fixture();
        let (alice_session, mut alice_rx) = f.registry.register(f.alice).await;
        let (_bob_session, bob_rx) = f.registry.register(f.bob).await;
        drop(bob_rx);

        let msg = f
            .fanout
            .submit(&alice_session, f.alice, &submit_json(f.chat_id, "aGk="))
            .await
            .unwrap();
        assert!(matches!(expect_frame(&mut alice_rx), ServerFrame::Delivery(d) if d.id == msg.id));
        assert_eq!(f.fanout.deliver(&msg).await, 1);
    }
}
