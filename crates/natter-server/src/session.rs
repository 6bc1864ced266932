//! Per-connection session: the socket handler and its state machine.
//!
//! ```text
//! PendingAuth --authenticate--> Authenticated
//!      |                              |
//!      +-------- transport close -----+--> Closed
//! ```
//!
//! Only an authenticated session contributes to presence, and closing
//! deregisters exactly the `(identity, connection)` pair it registered.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use natter_shared::protocol::{ClientEvent, Handshake, ServerEvent};
use natter_shared::types::{ConnectionId, Liveness, UserId};

use crate::api::AppState;
use crate::auth::TokenIssuer;
use crate::delivery::DeliveryRouter;
use crate::presence::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    PendingAuth,
    Authenticated(UserId),
    Closed,
}

impl SessionState {
    pub fn liveness(&self) -> Liveness {
        match self {
            SessionState::PendingAuth => Liveness::PendingAuth,
            SessionState::Authenticated(_) => Liveness::Authenticated,
            SessionState::Closed => Liveness::Closed,
        }
    }
}

/// Result of processing one `authenticate` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accepted(UserId),
    /// The session was already authenticated; nothing changed.
    Ignored,
    /// The session stays where it was.
    Rejected(String),
}

pub struct ClientSession {
    conn: ConnectionId,
    state: SessionState,
    router: Arc<DeliveryRouter>,
    tokens: Arc<TokenIssuer>,
    token_required: bool,
}

impl ClientSession {
    /// Attach a new transport connection. The session starts in
    /// `PendingAuth` and receives presence snapshots from now on.
    pub async fn open(
        router: Arc<DeliveryRouter>,
        tokens: Arc<TokenIssuer>,
        token_required: bool,
        outbound: Outbound,
    ) -> Self {
        let conn = ConnectionId::new();
        router.attach(conn, outbound).await;
        Self {
            conn,
            state: SessionState::PendingAuth,
            router,
            tokens,
            token_required,
        }
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn liveness(&self) -> Liveness {
        self.state.liveness()
    }

    /// Process one text frame. Frames that do not parse are logged and
    /// skipped.
    pub async fn handle_frame(&mut self, raw: &str) -> Option<HandshakeOutcome> {
        match ClientEvent::from_json(raw) {
            Ok(ClientEvent::Authenticate(handshake)) => Some(self.handshake(handshake).await),
            Err(e) => {
                warn!(conn = %self.conn, error = %e, "Invalid socket frame");
                None
            }
        }
    }

    pub async fn handshake(&mut self, handshake: Handshake) -> HandshakeOutcome {
        match self.state {
            SessionState::Authenticated(current) => {
                if current != handshake.user_id {
                    warn!(
                        conn = %self.conn,
                        bound = %current,
                        requested = %handshake.user_id,
                        "Ignoring handshake for a different user"
                    );
                }
                return HandshakeOutcome::Ignored;
            }
            SessionState::Closed => return HandshakeOutcome::Rejected("Session closed".into()),
            SessionState::PendingAuth => {}
        }

        if let Err(reason) = self.check_token(&handshake) {
            warn!(conn = %self.conn, user = %handshake.user_id, reason = %reason, "Handshake rejected");
            return HandshakeOutcome::Rejected(reason);
        }

        match self.router.register(handshake.user_id, self.conn).await {
            Ok(()) => {
                self.state = SessionState::Authenticated(handshake.user_id);
                HandshakeOutcome::Accepted(handshake.user_id)
            }
            Err(e) => {
                warn!(conn = %self.conn, error = %e, "Handshake could not register");
                HandshakeOutcome::Rejected(e.to_string())
            }
        }
    }

    fn check_token(&self, handshake: &Handshake) -> Result<(), String> {
        match handshake.token.as_deref() {
            Some(token) => match self.tokens.verify(token) {
                Ok(id) if id == handshake.user_id => Ok(()),
                Ok(_) => Err("Token belongs to another user".into()),
                Err(e) => Err(e.to_string()),
            },
            None if self.token_required => Err("Token required".into()),
            None => Ok(()),
        }
    }

    /// Tear the session down. Safe to call more than once.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        match previous {
            SessionState::Closed => return,
            SessionState::Authenticated(identity) => {
                self.router.deregister(identity, self.conn).await;
                info!(conn = %self.conn, user = %identity, "Session closed");
            }
            SessionState::PendingAuth => {
                debug!(conn = %self.conn, "Unauthenticated session closed");
            }
        }
        self.router.detach(self.conn).await;
    }
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_buffer);

    let mut session = ClientSession::open(
        state.router.clone(),
        state.tokens.clone(),
        state.config.socket_token_required,
        tx,
    )
    .await;
    let conn = session.conn();
    debug!(conn = %conn, "Socket opened");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(conn = %conn, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                session.handle_frame(text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.close().await;
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::{account, fixture};
    use natter_shared::protocol::SendMessageRequest;

    const SECRET: &str = "session-test-secret";

    async fn open(
        router: &Arc<DeliveryRouter>,
        token_required: bool,
    ) -> (ClientSession, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let tokens = Arc::new(TokenIssuer::new(SECRET, 60));
        let session = ClientSession::open(router.clone(), tokens, token_required, tx).await;
        (session, rx)
    }

    fn authenticate_frame(user: UserId) -> String {
        format!(r#"{{"event":"authenticate","data":{{"userId":"{user}"}}}}"#)
    }

    #[tokio::test]
    async fn test_pending_session_is_not_online() {
        let fx = fixture().await;
        let (session, _rx) = open(&fx.router, false).await;

        assert_eq!(session.liveness(), Liveness::PendingAuth);
        assert!(fx.router.registry().list_online().await.is_empty());
        assert_eq!(fx.router.registry().connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_handshake_then_drop_goes_offline() {
        let fx = fixture().await;
        let user = account(&fx.store, "Alice").await;
        let (mut session, _rx) = open(&fx.router, false).await;

        let outcome = session.handle_frame(&authenticate_frame(user)).await;
        assert_eq!(outcome, Some(HandshakeOutcome::Accepted(user)));
        assert!(fx.router.registry().is_online(user).await);

        session.close().await;
        assert_eq!(session.liveness(), Liveness::Closed);
        assert!(!fx.router.registry().is_online(user).await);
        assert_eq!(fx.router.registry().connection_count().await, 0);

        // A second close is a no-op.
        session.close().await;
        assert!(!fx.router.registry().is_online(user).await);
    }

    #[tokio::test]
    async fn test_second_handshake_ignored() {
        let fx = fixture().await;
        let alice = account(&fx.store, "Alice").await;
        let bob = account(&fx.store, "Bob").await;
        let (mut session, _rx) = open(&fx.router, false).await;

        session.handle_frame(&authenticate_frame(alice)).await;
        let again = session.handle_frame(&authenticate_frame(alice)).await;
        assert_eq!(again, Some(HandshakeOutcome::Ignored));

        let other = session.handle_frame(&authenticate_frame(bob)).await;
        assert_eq!(other, Some(HandshakeOutcome::Ignored));
        assert_eq!(session.state(), SessionState::Authenticated(alice));
        assert!(!fx.router.registry().is_online(bob).await);
    }

    #[tokio::test]
    async fn test_malformed_frame_skipped() {
        let fx = fixture().await;
        let (mut session, _rx) = open(&fx.router, false).await;

        assert_eq!(session.handle_frame("not json").await, None);
        assert_eq!(session.handle_frame(r#"{"event":"typing"}"#).await, None);
        assert_eq!(session.state(), SessionState::PendingAuth);
    }

    #[tokio::test]
    async fn test_token_must_match_user() {
        let fx = fixture().await;
        let alice = account(&fx.store, "Alice").await;
        let bob = account(&fx.store, "Bob").await;
        let (mut session, _rx) = open(&fx.router, true).await;

        let outcome = session
            .handshake(Handshake {
                user_id: alice,
                token: None,
            })
            .await;
        assert!(matches!(outcome, HandshakeOutcome::Rejected(_)));

        let bobs_token = TokenIssuer::new(SECRET, 60).issue(bob).unwrap();
        let outcome = session
            .handshake(Handshake {
                user_id: alice,
                token: Some(bobs_token),
            })
            .await;
        assert!(matches!(outcome, HandshakeOutcome::Rejected(_)));
        assert_eq!(session.state(), SessionState::PendingAuth);

        let token = TokenIssuer::new(SECRET, 60).issue(alice).unwrap();
        let outcome = session
            .handshake(Handshake {
                user_id: alice,
                token: Some(token),
            })
            .await;
        assert_eq!(outcome, HandshakeOutcome::Accepted(alice));
    }

    #[tokio::test]
    async fn test_handshake_after_close_rejected() {
        let fx = fixture().await;
        let user = account(&fx.store, "Alice").await;
        let (mut session, _rx) = open(&fx.router, false).await;

        session.close().await;
        let outcome = session.handle_frame(&authenticate_frame(user)).await;
        assert!(matches!(outcome, Some(HandshakeOutcome::Rejected(_))));
        assert!(!fx.router.registry().is_online(user).await);
    }

    #[tokio::test]
    async fn test_two_devices_receive_same_message() {
        let fx = fixture().await;
        let alice = account(&fx.store, "Alice").await;
        let bob = account(&fx.store, "Bob").await;

        let (mut phone, mut phone_rx) = open(&fx.router, false).await;
        let (mut laptop, mut laptop_rx) = open(&fx.router, false).await;
        phone.handle_frame(&authenticate_frame(alice)).await;
        laptop.handle_frame(&authenticate_frame(alice)).await;

        let sent = fx
            .router
            .send_message(bob, alice, SendMessageRequest::text("ping"))
            .await
            .unwrap();

        let pushed_id = |rx: &mut mpsc::Receiver<ServerEvent>| {
            let mut ids = Vec::new();
            while let Ok(ev) = rx.try_recv() {
                if let ServerEvent::NewMessage(m) = ev {
                    ids.push(m.id);
                }
            }
            ids
        };
        assert_eq!(pushed_id(&mut phone_rx), vec![sent.id]);
        assert_eq!(pushed_id(&mut laptop_rx), vec![sent.id]);

        // Closing one device keeps the user online through the other.
        phone.close().await;
        assert!(fx.router.registry().is_online(alice).await);
        laptop.close().await;
        assert!(!fx.router.registry().is_online(alice).await);
    }
}
