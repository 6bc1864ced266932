//! Event socket: handshake once, then read server pushes.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use natter_shared::protocol::{ClientEvent, Handshake, ServerEvent};
use natter_shared::types::UserId;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::reconciler::{ChatBackend, ChatSession};

pub struct EventSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl EventSocket {
    /// Connect and send the `authenticate` handshake.
    pub async fn connect(
        config: &ClientConfig,
        user_id: UserId,
        token: Option<String>,
    ) -> Result<Self, ClientError> {
        let url = config.socket_url();
        let (mut stream, _) = connect_async(url.as_str()).await?;

        let frame = ClientEvent::Authenticate(Handshake { user_id, token }).to_json()?;
        stream.send(Message::text(frame)).await?;

        info!(url = %url, user = %user_id, "Socket connected");
        Ok(Self { stream })
    }

    /// Next server event, or `None` once the server closes the socket.
    /// Frames that fail to decode are logged and skipped.
    pub async fn next_event(&mut self) -> Option<Result<ServerEvent, ClientError>> {
        while let Some(frame) = self.stream.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };
            match msg {
                Message::Text(text) => match ServerEvent::from_json(text.as_str()) {
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => warn!(error = %e, "Invalid server frame"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        debug!("Socket closed by server");
        None
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

/// Feed socket events into `session` until the socket closes, resyncing
/// unseen counts as the session's policy requires.
pub async fn drive<B: ChatBackend>(
    socket: &mut EventSocket,
    session: &mut ChatSession<B>,
) -> Result<(), ClientError> {
    while let Some(event) = socket.next_event().await {
        session.on_server_event(event?).await;
        if let Err(e) = session.maybe_resync().await {
            warn!(error = %e, "Resync failed");
        }
    }
    Ok(())
}
