//! Delivery router: persist first, then fan out to live connections.
//!
//! A message is pushed only after the store has accepted it. Pushes are
//! best effort; anything missed is recovered by the receiver's next history
//! fetch. Per receiver, push order equals persistence order: persist and
//! enqueue happen under one sequencer lock, and each connection's queue is
//! FIFO.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use natter_shared::protocol::{ChatMessage, SendMessageRequest, ServerEvent};
use natter_shared::types::{ConnectionId, UserId};
use natter_store::NewMessage;

use crate::blob_store::BlobStore;
use crate::error::ServerError;
use crate::presence::{Outbound, PresenceError, PresenceRegistry};
use crate::store::Store;

pub struct DeliveryRouter {
    registry: PresenceRegistry,
    store: Store,
    blobs: Arc<BlobStore>,
    sequencer: Mutex<()>,
}

impl DeliveryRouter {
    pub fn new(store: Store, blobs: Arc<BlobStore>) -> Self {
        Self {
            registry: PresenceRegistry::new(),
            store,
            blobs,
            sequencer: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    pub async fn attach(&self, conn: ConnectionId, outbound: Outbound) {
        self.registry.attach(conn, outbound).await;
    }

    pub async fn detach(&self, conn: ConnectionId) {
        self.registry.detach(conn).await;
    }

    /// Register a handshaken connection and announce the new online set.
    pub async fn register(&self, identity: UserId, conn: ConnectionId) -> Result<(), PresenceError> {
        self.registry.register(identity, conn).await?;
        self.broadcast_presence().await;
        Ok(())
    }

    /// Remove a connection from presence and announce the new online set.
    /// Absent pairs are a silent no-op.
    pub async fn deregister(&self, identity: UserId, conn: ConnectionId) {
        self.registry.deregister(identity, conn).await;
        self.broadcast_presence().await;
    }

    /// Push the current online set to every live connection.
    pub async fn broadcast_presence(&self) -> usize {
        let reached = self.registry.push_snapshot().await;
        debug!(reached, "Presence snapshot broadcast");
        reached
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Validate, persist and fan out a message. Returns the persisted
    /// message whether or not the receiver is online.
    pub async fn send_message(
        &self,
        sender: UserId,
        receiver: UserId,
        payload: SendMessageRequest,
    ) -> Result<ChatMessage, ServerError> {
        let payload = payload.normalized()?;

        // Unknown receivers are a caller error, not a store failure.
        self.store.get_user(receiver).await?;

        let image = match payload.image.as_deref() {
            Some(raw) => Some(self.blobs.upload(raw).await?),
            None => None,
        };

        let new = NewMessage {
            sender_id: sender,
            receiver_id: receiver,
            text: payload.text,
            image,
        };

        let _turn = self.sequencer.lock().await;

        let message: ChatMessage = self.store.create_message(new).await?.into();
        let event = ServerEvent::NewMessage(message.clone());
        let delivered = self.registry.push_to(receiver, &event).await;

        info!(
            id = %message.id,
            sender = %sender,
            receiver = %receiver,
            delivered,
            "Message persisted"
        );

        Ok(message)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use natter_store::{Database, User};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    pub(crate) struct Fixture {
        pub router: Arc<DeliveryRouter>,
        pub store: Store,
        _media: TempDir,
    }

    pub(crate) async fn fixture() -> Fixture {
        let media = TempDir::new().unwrap();
        let blobs = Arc::new(
            BlobStore::new(media.path().to_path_buf(), 64 * 1024, "http://localhost:5000")
                .await
                .unwrap(),
        );
        let store = Store::from_database(Database::open_in_memory().unwrap());
        let router = Arc::new(DeliveryRouter::new(store.clone(), blobs));
        Fixture {
            router,
            store,
            _media: media,
        }
    }

    pub(crate) async fn account(store: &Store, name: &str) -> UserId {
        let user = User {
            id: UserId::new(),
            email: format!("{}@example.com", name.to_lowercase()),
            full_name: name.to_string(),
            bio: "bio".into(),
            profile_pic: None,
            password_hash: "$argon2id$placeholder".into(),
            created_at: chrono::Utc::now(),
        };
        store.insert_user(user).await.unwrap().id
    }

    async fn device(router: &DeliveryRouter, user: UserId) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::channel(64);
        router.attach(conn, tx).await;
        router.register(user, conn).await.unwrap();
        (conn, rx)
    }

    fn drain_messages(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let ServerEvent::NewMessage(m) = ev {
                out.push(m);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_offline_receiver_still_persists() {
        let fx = fixture().await;
        let a = account(&fx.store, "Alice").await;
        let b = account(&fx.store, "Bob").await;

        let msg = fx
            .router
            .send_message(a, b, SendMessageRequest::text("hi"))
            .await
            .unwrap();
        assert!(!msg.seen);

        let counts = fx.store.count_unseen_grouped_by_sender(b).await.unwrap();
        assert_eq!(counts.get(&a), Some(&1));
    }

    #[tokio::test]
    async fn test_fan_out_to_every_device() {
        let fx = fixture().await;
        let a = account(&fx.store, "Alice").await;
        let b = account(&fx.store, "Bob").await;

        let (_c1, mut rx1) = device(&fx.router, a).await;
        let (_c2, mut rx2) = device(&fx.router, a).await;
        let (_cb, mut rxb) = device(&fx.router, b).await;

        let msg = fx
            .router
            .send_message(b, a, SendMessageRequest::text("to both devices"))
            .await
            .unwrap();

        let got1 = drain_messages(&mut rx1);
        let got2 = drain_messages(&mut rx2);
        assert_eq!(got1, vec![msg.clone()]);
        assert_eq!(got2, vec![msg]);
        assert!(drain_messages(&mut rxb).is_empty());
    }

    #[tokio::test]
    async fn test_per_receiver_order_matches_persistence() {
        let fx = fixture().await;
        let a = account(&fx.store, "Alice").await;
        let b = account(&fx.store, "Bob").await;
        let c = account(&fx.store, "Carol").await;
        let (_conn, mut rx) = device(&fx.router, a).await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let router = fx.router.clone();
            let sender = if i % 2 == 0 { b } else { c };
            handles.push(tokio::spawn(async move {
                router
                    .send_message(sender, a, SendMessageRequest::text(format!("m{i}")))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let pushed: Vec<_> = drain_messages(&mut rx).into_iter().map(|m| m.id).collect();
        let mut persisted = fx.store.find_between(a, b).await.unwrap();
        persisted.extend(fx.store.find_between(a, c).await.unwrap());
        persisted.sort_by_key(|m| m.created_at);
        assert_eq!(pushed.len(), 20);

        let pushed_times: Vec<_> = pushed
            .iter()
            .map(|id| persisted.iter().find(|m| m.id == *id).unwrap().created_at)
            .collect();
        assert!(pushed_times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_empty_payload_persists_nothing() {
        let fx = fixture().await;
        let a = account(&fx.store, "Alice").await;
        let b = account(&fx.store, "Bob").await;

        let err = fx
            .router
            .send_message(a, b, SendMessageRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
        assert!(fx.store.find_between(a, b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_aborts_message() {
        let fx = fixture().await;
        let a = account(&fx.store, "Alice").await;
        let b = account(&fx.store, "Bob").await;
        let (_conn, mut rx) = device(&fx.router, b).await;

        let payload = SendMessageRequest {
            text: Some("see attached".into()),
            image: Some("data:image/png;base64,!!!not-base64".into()),
        };
        assert!(fx.router.send_message(a, b, payload).await.is_err());
        assert!(fx.store.find_between(a, b).await.unwrap().is_empty());
        assert!(drain_messages(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_receiver_rejected() {
        let fx = fixture().await;
        let a = account(&fx.store, "Alice").await;
        let err = fx
            .router
            .send_message(a, UserId::new(), SendMessageRequest::text("hello?"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_register_broadcasts_presence_to_everyone() {
        let fx = fixture().await;
        let a = account(&fx.store, "Alice").await;
        let b = account(&fx.store, "Bob").await;

        let (_ca, mut rxa) = device(&fx.router, a).await;
        let (cb, _rxb) = device(&fx.router, b).await;

        let mut last = None;
        while let Ok(ev) = rxa.try_recv() {
            last = Some(ev);
        }
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(last, Some(ServerEvent::OnlineUsers(expected)));

        fx.router.deregister(b, cb).await;
        assert_eq!(rxa.try_recv().unwrap(), ServerEvent::OnlineUsers(vec![a]));
    }
}
