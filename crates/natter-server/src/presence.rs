//! Presence registry: who is online, and through which connections.
//!
//! The registry owns two maps behind one lock:
//! - every attached transport connection with its outbound queue, whether or
//!   not it has completed the handshake;
//! - for each identity, the set of connections authenticated as it.
//!
//! An identity is present in the second map iff it has at least one
//! authenticated connection. Removal is always total: deregistering or
//! detaching something that is already gone is a no-op, because cleanup can
//! legitimately race with itself during disconnects.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use natter_shared::protocol::ServerEvent;
use natter_shared::types::{ConnectionId, UserId};

/// Queue feeding one connection's socket writer.
pub type Outbound = mpsc::Sender<ServerEvent>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresenceError {
    /// The connection was never attached or has already been detached.
    #[error("connection {0} is not attached")]
    UnknownConnection(ConnectionId),

    /// The connection already completed a handshake as someone else.
    #[error("connection {conn} is already bound to {bound}")]
    AlreadyBound { conn: ConnectionId, bound: UserId },
}

struct Link {
    identity: Option<UserId>,
    outbound: Outbound,
}

#[derive(Default)]
struct PresenceState {
    online: HashMap<UserId, HashSet<ConnectionId>>,
    links: HashMap<ConnectionId, Link>,
}

impl PresenceState {
    fn unbind(&mut self, identity: UserId, conn: ConnectionId) -> bool {
        let Some(entry) = self.online.get_mut(&identity) else {
            return false;
        };
        let removed = entry.remove(&conn);
        if entry.is_empty() {
            self.online.remove(&identity);
        }
        removed
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    state: RwLock<PresenceState>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted transport connection.
    pub async fn attach(&self, conn: ConnectionId, outbound: Outbound) {
        let mut state = self.state.write().await;
        state.links.insert(
            conn,
            Link {
                identity: None,
                outbound,
            },
        );
        debug!(conn = %conn, links = state.links.len(), "Connection attached");
    }

    /// Forget a transport connection. Returns `false` if it was not attached.
    pub async fn detach(&self, conn: ConnectionId) -> bool {
        let mut state = self.state.write().await;
        let Some(link) = state.links.remove(&conn) else {
            return false;
        };

        if let Some(identity) = link.identity {
            if state.unbind(identity, conn) {
                warn!(conn = %conn, user = %identity, "Detached a connection that was still registered");
            }
        }

        debug!(conn = %conn, links = state.links.len(), "Connection detached");
        true
    }

    /// Bind `conn` to `identity`.
    ///
    /// Returns `Ok(true)` when the pair is new and `Ok(false)` when it was
    /// already registered.
    pub async fn register(&self, identity: UserId, conn: ConnectionId) -> Result<bool, PresenceError> {
        let mut state = self.state.write().await;

        let link = state
            .links
            .get_mut(&conn)
            .ok_or(PresenceError::UnknownConnection(conn))?;

        match link.identity {
            Some(bound) if bound != identity => {
                return Err(PresenceError::AlreadyBound { conn, bound });
            }
            Some(_) => return Ok(false),
            None => link.identity = Some(identity),
        }

        let entry = state.online.entry(identity).or_default();
        entry.insert(conn);
        let devices = entry.len();

        info!(
            user = %identity,
            conn = %conn,
            devices,
            online = state.online.len(),
            "User registered"
        );
        Ok(true)
    }

    /// Remove the `(identity, conn)` pair. Returns whether anything changed.
    pub async fn deregister(&self, identity: UserId, conn: ConnectionId) -> bool {
        let mut state = self.state.write().await;

        if let Some(link) = state.links.get_mut(&conn) {
            if link.identity == Some(identity) {
                link.identity = None;
            }
        }

        let removed = state.unbind(identity, conn);
        if removed {
            info!(
                user = %identity,
                conn = %conn,
                still_online = state.online.contains_key(&identity),
                "User deregistered"
            );
        } else {
            debug!(user = %identity, conn = %conn, "Deregister of absent pair ignored");
        }
        removed
    }

    /// Snapshot of every identity with at least one live connection.
    pub async fn list_online(&self) -> HashSet<UserId> {
        self.state.read().await.online.keys().copied().collect()
    }

    /// Connections currently authenticated as `identity` (empty if offline).
    pub async fn connections_for(&self, identity: UserId) -> HashSet<ConnectionId> {
        self.state
            .read()
            .await
            .online
            .get(&identity)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, identity: UserId) -> bool {
        self.state.read().await.online.contains_key(&identity)
    }

    /// Number of attached connections, authenticated or not.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.links.len()
    }

    /// Queue `event` on every connection of `identity`. Returns the number of
    /// connections the event was queued on.
    pub async fn push_to(&self, identity: UserId, event: &ServerEvent) -> usize {
        let state = self.state.read().await;
        let Some(conns) = state.online.get(&identity) else {
            return 0;
        };

        conns
            .iter()
            .filter_map(|conn| state.links.get(conn).map(|link| (conn, link)))
            .filter(|(conn, link)| try_push(**conn, &link.outbound, event))
            .count()
    }

    /// Queue a snapshot of the online set on every attached connection.
    ///
    /// The snapshot is taken and queued under one read guard, so no
    /// connection can observe an older snapshot after a newer one.
    pub async fn push_snapshot(&self) -> usize {
        let state = self.state.read().await;
        let mut online: Vec<UserId> = state.online.keys().copied().collect();
        online.sort();
        let event = ServerEvent::OnlineUsers(online);

        state
            .links
            .iter()
            .filter(|(conn, link)| try_push(**conn, &link.outbound, &event))
            .count()
    }
}

/// Best-effort enqueue. A full or closed queue drops the event: the message
/// is already persisted and the client recovers it on its next fetch.
fn try_push(conn: ConnectionId, outbound: &Outbound, event: &ServerEvent) -> bool {
    match outbound.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!(conn = %conn, "Dropping push for slow connection");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(conn = %conn, "Dropping push for closed connection");
            false
        }
    }
}
