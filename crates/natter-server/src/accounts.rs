//! Account endpoints: signup, login, token check, profile update.

use axum::{extract::State, Json};
use chrono::Utc;
use tracing::info;

use natter_shared::protocol::{
    AuthResponse, LoginRequest, ProfileResponse, SignupRequest, UpdateProfileRequest,
};
use natter_shared::types::UserId;
use natter_store::{ProfileChanges, User};

use crate::api::AppState;
use crate::auth::{hash_password, verify_password, AuthUser};
use crate::error::ServerError;

const INVALID_CREDENTIALS: &str = "Invalid Credentials";

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    req.validate()?;

    let email = req.email.trim().to_lowercase();
    if state.store.find_user_by_email(email.clone()).await?.is_some() {
        return Err(ServerError::Conflict("Account already exists".into()));
    }

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

    let user = state
        .store
        .insert_user(User {
            id: UserId::new(),
            email,
            full_name: req.full_name.trim().to_string(),
            bio: req.bio.trim().to_string(),
            profile_pic: None,
            password_hash,
            created_at: Utc::now(),
        })
        .await?;

    let token = state.tokens.issue(user.id)?;
    info!(user = %user.id, "Account created");

    Ok(Json(AuthResponse {
        success: true,
        user_data: user.into(),
        token,
        message: "Account created successfully".into(),
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .find_user_by_email(email)
        .await?
        .ok_or_else(|| ServerError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    let password = req.password;
    let hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?;
    if !valid {
        return Err(ServerError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    let token = state.tokens.issue(user.id)?;
    info!(user = %user.id, "Login");

    Ok(Json(AuthResponse {
        success: true,
        user_data: user.into(),
        token,
        message: "Login successful".into(),
    }))
}

pub async fn check(AuthUser(user): AuthUser) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        success: true,
        user: user.into(),
    })
}

pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ServerError> {
    req.validate()?;

    let profile_pic = match req.profile_pic.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(raw) => Some(state.blobs.upload(raw).await?),
        None => None,
    };

    let changes = ProfileChanges {
        full_name: req.full_name.map(|n| n.trim().to_string()),
        bio: req.bio,
        profile_pic,
    };

    let user = state.store.update_profile(auth.id(), changes).await?;
    info!(user = %user.id, "Profile updated");

    Ok(Json(ProfileResponse {
        success: true,
        user: user.into(),
    }))
}
