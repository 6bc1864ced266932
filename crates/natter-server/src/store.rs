//! Async facade over the SQLite [`Database`].
//!
//! Every call runs on tokio's blocking pool so that store I/O never stalls
//! the runtime or any lock held by the presence/delivery layer.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use natter_shared::types::{MessageId, UserId};
use natter_store::{Database, Message, NewMessage, ProfileChanges, StoreError, User};

use crate::error::ServerError;

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, ServerError> {
        let db = Database::open_at(path)?;
        Ok(Self::from_database(db))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|e| ServerError::Internal(format!("Database lock poisoned: {e}")))?;
            f(&mut *guard).map_err(ServerError::from)
        })
        .await?
    }

    // -- accounts --

    pub async fn insert_user(&self, user: User) -> Result<User, ServerError> {
        self.with_db(move |db| db.insert_user(&user).map(|_| user)).await
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, ServerError> {
        self.with_db(move |db| db.get_user(id)).await
    }

    pub async fn find_user_by_email(&self, email: String) -> Result<Option<User>, ServerError> {
        self.with_db(move |db| db.find_user_by_email(&email)).await
    }

    pub async fn list_users_except(&self, viewer: UserId) -> Result<Vec<User>, ServerError> {
        self.with_db(move |db| db.list_users_except(viewer)).await
    }

    pub async fn update_profile(
        &self,
        id: UserId,
        changes: ProfileChanges,
    ) -> Result<User, ServerError> {
        self.with_db(move |db| db.update_profile(id, &changes)).await
    }

    // -- messages --

    pub async fn create_message(&self, new: NewMessage) -> Result<Message, ServerError> {
        self.with_db(move |db| db.create_message(new)).await
    }

    pub async fn get_message(&self, id: MessageId) -> Result<Message, ServerError> {
        self.with_db(move |db| db.get_message(id)).await
    }

    pub async fn find_between(&self, a: UserId, b: UserId) -> Result<Vec<Message>, ServerError> {
        self.with_db(move |db| db.find_between(a, b)).await
    }

    /// History for `viewer`, with what `peer` sent marked seen in the same
    /// transaction.
    pub async fn read_conversation(
        &self,
        viewer: UserId,
        peer: UserId,
    ) -> Result<(Vec<Message>, usize), ServerError> {
        self.with_db(move |db| db.read_conversation(viewer, peer)).await
    }

    pub async fn mark_seen(&self, id: MessageId) -> Result<bool, ServerError> {
        self.with_db(move |db| db.mark_seen(id)).await
    }

    pub async fn mark_all_seen_from(
        &self,
        sender: UserId,
        receiver: UserId,
    ) -> Result<usize, ServerError> {
        self.with_db(move |db| db.mark_all_seen_from(sender, receiver)).await
    }

    pub async fn count_unseen_grouped_by_sender(
        &self,
        receiver: UserId,
    ) -> Result<HashMap<UserId, u32>, ServerError> {
        self.with_db(move |db| db.count_unseen_grouped_by_sender(receiver))
            .await
    }
}
