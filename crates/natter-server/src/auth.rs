//! Identity verification.
//!
//! Bearer tokens are HS256 JWTs carrying the account id. Passwords are
//! stored as argon2id PHC strings. The [`AuthUser`] extractor turns a request
//! into a verified account or rejects it with 401 before the handler runs.

use std::time::{SystemTime, UNIX_EPOCH};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use natter_shared::constants::TOKEN_HEADER;
use natter_shared::types::UserId;
use natter_store::User;

use crate::api::AppState;
use crate::error::ServerError;

/// Payload stored in a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// Account id.
    sub: UserId,
    /// Issued at (Unix timestamp)
    iat: u64,
    /// Expiration time (Unix timestamp)
    exp: u64,
}

/// Issues and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn issue(&self, user: UserId) -> Result<String, ServerError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ServerError::Internal(format!("System time error: {e}")))?
            .as_secs();

        let claims = Claims {
            sub: user,
            iat: now,
            exp: now + self.ttl_secs,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ServerError::Internal(format!("Failed to generate token: {e}")))
    }

    /// Turn a token into the identity it was issued for.
    pub fn verify(&self, token: &str) -> Result<UserId, ServerError> {
        match decode::<Claims>(token, &self.decoding, &Validation::default()) {
            Ok(data) => Ok(data.claims.sub),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "Token expired",
                    ErrorKind::InvalidSignature => "Invalid signature",
                    _ => "Token is not valid",
                };
                Err(ServerError::Unauthorized(reason.into()))
            }
        }
    }
}

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String, ServerError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServerError::Internal(format!("Failed to hash password: {e}")))
}

/// Check a password against a stored PHC hash. A malformed hash never
/// verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

/// Accept `Authorization: Bearer <t>`, a bare `Authorization: <t>`, or a
/// `token: <t>` header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get("authorization")
        .or_else(|| headers.get(TOKEN_HEADER))
        .and_then(|v| v.to_str().ok())?
        .trim();

    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!token.is_empty()).then_some(token)
}

/// The verified account behind a request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> UserId {
        self.0.id
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers)
            .ok_or_else(|| ServerError::Unauthorized("No token provided".into()))?;

        let user_id = state.tokens.verify(token)?;

        match state.store.get_user(user_id).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(ServerError::NotFound(_)) => {
                Err(ServerError::Unauthorized("User not found".into()))
            }
            Err(e) => Err(e),
        }
    }
}
