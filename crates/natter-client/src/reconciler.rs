//! Client chat session and unseen-count reconciliation.
//!
//! Counts move locally as pushes arrive, but the server's grouped count is
//! the only authority: every sidebar fetch overwrites the local counters
//! wholesale. Local updates just keep the badge responsive in between.

use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use tracing::{debug, warn};

use natter_shared::protocol::{
    ChatMessage, SendMessageRequest, ServerEvent, SidebarResponse, UserProfile,
};
use natter_shared::types::{MessageId, UserId};

use crate::config::ResyncPolicy;
use crate::error::ClientError;
use crate::unseen::UnseenCounters;

/// The server operations a chat session depends on.
pub trait ChatBackend {
    fn sidebar(&self) -> impl Future<Output = Result<SidebarResponse, ClientError>> + Send;

    /// Conversation with `peer`, oldest first.
    fn history(&self, peer: UserId)
        -> impl Future<Output = Result<Vec<ChatMessage>, ClientError>> + Send;

    fn send(
        &self,
        peer: UserId,
        payload: SendMessageRequest,
    ) -> impl Future<Output = Result<ChatMessage, ClientError>> + Send;

    fn mark_seen(&self, id: MessageId) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Mark everything `sender` sent to the caller as seen.
    fn mark_all_from(&self, sender: UserId)
        -> impl Future<Output = Result<(), ClientError>> + Send;
}

pub struct ChatSession<B> {
    backend: B,
    me: UserId,
    resync: ResyncPolicy,
    active: Option<UserId>,
    messages: Vec<ChatMessage>,
    users: Vec<UserProfile>,
    unseen: UnseenCounters,
    online: HashSet<UserId>,
    last_resync: Option<Instant>,
}

impl<B: ChatBackend> ChatSession<B> {
    pub fn new(backend: B, me: UserId, resync: ResyncPolicy) -> Self {
        Self {
            backend,
            me,
            resync,
            active: None,
            messages: Vec::new(),
            users: Vec::new(),
            unseen: UnseenCounters::new(),
            online: HashSet::new(),
            last_resync: None,
        }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.active
    }

    /// Messages of the active conversation, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn users(&self) -> &[UserProfile] {
        &self.users
    }

    pub fn unseen(&self) -> &UnseenCounters {
        &self.unseen
    }

    pub fn online(&self) -> &HashSet<UserId> {
        &self.online
    }

    pub fn is_online(&self, peer: UserId) -> bool {
        self.online.contains(&peer)
    }

    /// Fetch the sidebar and overwrite the unseen counters with the server's.
    pub async fn refresh_sidebar(&mut self) -> Result<&[UserProfile], ClientError> {
        let sidebar = self.backend.sidebar().await?;
        self.users = sidebar.users;
        self.unseen.replace_all(sidebar.unseen_messages);
        self.last_resync = Some(Instant::now());
        debug!(users = self.users.len(), unseen = self.unseen.total(), "Sidebar refreshed");
        Ok(&self.users)
    }

    /// Resync if the policy says the counters are due. Returns whether a
    /// sidebar fetch happened.
    pub async fn maybe_resync(&mut self) -> Result<bool, ClientError> {
        let due = match (self.resync, self.last_resync) {
            (ResyncPolicy::OnSidebarFetch, _) => false,
            (ResyncPolicy::Every(_), None) => true,
            (ResyncPolicy::Every(interval), Some(at)) => at.elapsed() >= interval,
        };
        if due {
            self.refresh_sidebar().await?;
        }
        Ok(due)
    }

    /// Open the conversation with `peer`: fetch its history, mark everything
    /// from `peer` seen on the server, then clear the local counter.
    ///
    /// A failed history fetch leaves the counter and the currently open
    /// conversation untouched. A failed bulk
    /// mark still clears it; the next resync restores the true count.
    pub async fn select_peer(&mut self, peer: UserId) -> Result<&[ChatMessage], ClientError> {
        let messages = self.backend.history(peer).await?;
        self.active = Some(peer);
        self.messages = messages;

        if let Err(e) = self.backend.mark_all_from(peer).await {
            warn!(peer = %peer, error = %e, "Bulk mark-seen failed");
        }
        self.unseen.clear(peer);

        for m in self.messages.iter_mut().filter(|m| m.sender_id == peer) {
            m.seen = true;
        }
        Ok(&self.messages)
    }

    pub fn close_conversation(&mut self) {
        self.active = None;
        self.messages.clear();
    }

    /// Send to the active peer and append the persisted message.
    pub async fn send(&mut self, payload: SendMessageRequest) -> Result<ChatMessage, ClientError> {
        let peer = self.active.ok_or(ClientError::NoActivePeer)?;
        let payload = payload.normalized()?;
        let message = self.backend.send(peer, payload).await?;
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Apply one pushed event.
    pub async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::OnlineUsers(users) => {
                self.online = users.into_iter().collect();
            }
            ServerEvent::NewMessage(message) => self.on_new_message(message).await,
        }
    }

    async fn on_new_message(&mut self, mut message: ChatMessage) {
        if message.receiver_id != self.me {
            debug!(id = ?message.id, "Ignoring push addressed to someone else");
            return;
        }

        if self.active == Some(message.sender_id) {
            // History fetched after the push was queued may already hold it.
            if self.messages.iter().any(|m| m.id == message.id) {
                debug!(id = ?message.id, "Push already in conversation");
                return;
            }
            message.seen = true;
            let id = message.id;
            self.messages.push(message);
            if let Err(e) = self.backend.mark_seen(id).await {
                warn!(id = ?id, error = %e, "Failed to mark message seen");
            }
        } else {
            let count = self.unseen.increment(message.sender_id);
            debug!(sender = %message.sender_id, count, "Unseen message");
        }
    }
}
