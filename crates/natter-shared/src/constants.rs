/// Client -> server handshake event.
pub const EVENT_AUTHENTICATE: &str = "authenticate";

/// Server -> client presence snapshot.
pub const EVENT_ONLINE_USERS: &str = "getOnlineUser";

/// Server -> client message push.
pub const EVENT_NEW_MESSAGE: &str = "newMessage";

/// Path of the WebSocket endpoint.
pub const SOCKET_PATH: &str = "/ws";

/// Header accepted as an alternative to `Authorization: Bearer`.
pub const TOKEN_HEADER: &str = "token";

/// Maximum accepted length of a text message, in characters.
pub const MAX_TEXT_CHARS: usize = 10_000;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Default lifetime of an issued bearer token (7 days).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;
