use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, Method},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use natter_shared::constants::SOCKET_PATH;
use natter_shared::protocol::{
    Ack, ChatMessage, HistoryResponse, SendMessageRequest, SendMessageResponse, SidebarResponse,
    UserProfile,
};
use natter_shared::types::{MessageId, UserId};

use crate::accounts;
use crate::auth::{AuthUser, TokenIssuer};
use crate::blob_store::{BlobStore, MEDIA_ROUTE};
use crate::config::ServerConfig;
use crate::delivery::DeliveryRouter;
use crate::error::ServerError;
use crate::session::ws_handler;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub blobs: Arc<BlobStore>,
    pub router: Arc<DeliveryRouter>,
    pub tokens: Arc<TokenIssuer>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Store, blobs: Arc<BlobStore>, config: ServerConfig) -> Self {
        let router = Arc::new(DeliveryRouter::new(store.clone(), blobs.clone()));
        let tokens = Arc::new(TokenIssuer::new(&config.jwt_secret, config.token_ttl_secs));
        Self {
            store,
            blobs,
            router,
            tokens,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(server_status))
        .route("/api/auth/signup", post(accounts::signup))
        .route("/api/auth/login", post(accounts::login))
        .route("/api/auth/check", get(accounts::check))
        .route("/api/auth/update-profile", put(accounts::update_profile))
        .route("/api/messages/users", get(sidebar))
        .route("/api/messages/{peer}", get(history))
        .route("/api/messages/send/{peer}", post(send_message))
        .route("/api/messages/mark/{id}", put(mark_message))
        .route("/api/messages/mark-from-user/{sender}", put(mark_from_user))
        .route(&format!("{MEDIA_ROUTE}/{{file}}"), get(media))
        .route(SOCKET_PATH, get(ws_handler))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    success: bool,
    version: &'static str,
    online_users: usize,
    connections: usize,
    uptime_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let registry = state.router.registry();
    Json(StatusResponse {
        success: true,
        version: env!("CARGO_PKG_VERSION"),
        online_users: registry.list_online().await.len(),
        connections: registry.connection_count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Every other account, plus the caller's unseen counts per sender.
async fn sidebar(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<SidebarResponse>, ServerError> {
    let users = state.store.list_users_except(auth.id()).await?;
    let unseen_messages = state.store.count_unseen_grouped_by_sender(auth.id()).await?;

    Ok(Json(SidebarResponse {
        success: true,
        users: users.into_iter().map(UserProfile::from).collect(),
        unseen_messages,
    }))
}

/// Conversation with `peer`, oldest first. Everything the peer sent to the
/// caller is marked seen in the same transaction as the read.
async fn history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(peer): Path<UserId>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let (messages, marked) = state.store.read_conversation(auth.id(), peer).await?;
    debug!(user = %auth.id(), peer = %peer, count = messages.len(), marked, "History fetched");

    Ok(Json(HistoryResponse {
        success: true,
        messages: messages.into_iter().map(ChatMessage::from).collect(),
    }))
}

async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(peer): Path<UserId>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ServerError> {
    let new_message = state.router.send_message(auth.id(), peer, payload).await?;
    Ok(Json(SendMessageResponse {
        success: true,
        new_message,
    }))
}

/// Mark one message seen. Only its receiver may do so.
async fn mark_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<MessageId>,
) -> Result<Json<Ack>, ServerError> {
    let message = match state.store.get_message(id).await {
        Ok(m) => m,
        Err(ServerError::NotFound(_)) => {
            return Err(ServerError::NotFound(format!("message {}", id.0)))
        }
        Err(e) => return Err(e),
    };
    if message.receiver_id != auth.id() {
        return Err(ServerError::Forbidden("Not the receiver of this message".into()));
    }

    let changed = state.store.mark_seen(id).await?;
    Ok(Json(Ack {
        success: true,
        updated: Some(u64::from(changed)),
    }))
}

async fn mark_from_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(sender): Path<UserId>,
) -> Result<Json<Ack>, ServerError> {
    let updated = state.store.mark_all_seen_from(sender, auth.id()).await?;
    Ok(Json(Ack {
        success: true,
        updated: Some(updated as u64),
    }))
}

async fn media(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let (bytes, content_type) = state.blobs.get(&file).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
