//! REST access to the server.

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use natter_shared::protocol::{
    Ack, AuthResponse, ChatMessage, ErrorBody, HistoryResponse, LoginRequest, ProfileResponse,
    SendMessageRequest, SendMessageResponse, SidebarResponse, SignupRequest, UpdateProfileRequest,
    UserProfile,
};
use natter_shared::types::{MessageId, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::reconciler::ChatBackend;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: ClientConfig,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            token: None,
        }
    }

    /// Reuse a token from an earlier login.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn signup(&mut self, req: &SignupRequest) -> Result<UserProfile, ClientError> {
        req.validate()?;
        let url = self.config.endpoint("/api/auth/signup");
        let auth: AuthResponse = decode(self.client.post(url).json(req).send().await?).await?;
        info!(user = %auth.user_data.id, "Signed up");
        self.token = Some(auth.token);
        Ok(auth.user_data)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let req = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let url = self.config.endpoint("/api/auth/login");
        let auth: AuthResponse = decode(self.client.post(url).json(&req).send().await?).await?;
        info!(user = %auth.user_data.id, "Logged in");
        self.token = Some(auth.token);
        Ok(auth.user_data)
    }

    pub fn logout(&mut self) {
        self.token = None;
    }

    /// Verify the current token and return the account behind it.
    pub async fn check(&self) -> Result<UserProfile, ClientError> {
        let res: ProfileResponse = self.get("/api/auth/check").await?;
        Ok(res.user)
    }

    pub async fn update_profile(
        &self,
        req: &UpdateProfileRequest,
    ) -> Result<UserProfile, ClientError> {
        req.validate()?;
        let builder = self
            .client
            .put(self.config.endpoint("/api/auth/update-profile"))
            .json(req);
        let res: ProfileResponse = decode(self.authorized(builder)?.send().await?).await?;
        Ok(res.user)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.token.as_deref().ok_or(ClientError::NotAuthenticated)?;
        Ok(builder.bearer_auth(token))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let builder = self.client.get(self.config.endpoint(path));
        decode(self.authorized(builder)?.send().await?).await
    }

    async fn put<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let builder = self.client.put(self.config.endpoint(path));
        decode(self.authorized(builder)?.send().await?).await
    }
}

impl ChatBackend for HttpBackend {
    async fn sidebar(&self) -> Result<SidebarResponse, ClientError> {
        self.get("/api/messages/users").await
    }

    async fn history(&self, peer: UserId) -> Result<Vec<ChatMessage>, ClientError> {
        let res: HistoryResponse = self.get(&format!("/api/messages/{peer}")).await?;
        Ok(res.messages)
    }

    async fn send(
        &self,
        peer: UserId,
        payload: SendMessageRequest,
    ) -> Result<ChatMessage, ClientError> {
        let builder = self
            .client
            .post(self.config.endpoint(&format!("/api/messages/send/{peer}")))
            .json(&payload);
        let res: SendMessageResponse = decode(self.authorized(builder)?.send().await?).await?;
        Ok(res.new_message)
    }

    async fn mark_seen(&self, id: MessageId) -> Result<(), ClientError> {
        let _: Ack = self.put(&format!("/api/messages/mark/{}", id.0)).await?;
        Ok(())
    }

    async fn mark_all_from(&self, sender: UserId) -> Result<(), ClientError> {
        let ack: Ack = self
            .put(&format!("/api/messages/mark-from-user/{sender}"))
            .await?;
        debug!(sender = %sender, updated = ?ack.updated, "Marked conversation seen");
        Ok(())
    }
}

/// Decode a success body, or turn an error body into [`ClientError::Api`].
async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, ClientError> {
    let status = res.status();
    let bytes = res.bytes().await?;
    if status.is_success() {
        return Ok(serde_json::from_slice(&bytes)?);
    }
    Err(api_error(status.as_u16(), &bytes))
}

fn api_error(status: u16, body: &[u8]) -> ClientError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    ClientError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_uses_server_message() {
        let err = api_error(401, br#"{"success":false,"message":"Invalid Credentials"}"#);
        assert!(err.is_unauthorized());
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid Credentials");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_api_error_falls_back_to_raw_body() {
        match api_error(502, b"Bad Gateway") {
            ClientError::Api { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requests_need_token() {
        let backend = HttpBackend::new(ClientConfig::default());
        let err = backend.sidebar().await.unwrap_err();
        assert!(matches!(err, ClientError::NotAuthenticated));
    }
}
