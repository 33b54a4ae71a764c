//! HttpAuthzClient -- concrete [`AuthorizationRpc`] implementation.
//!
//! Asks the workspace authorization service whether a user holds a
//! permission level on a project. The service token is wrapped in
//! [`secrecy::SecretString`] and is never logged or included in `Debug`
//! output.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stratagem_core::access::{AccessLevel, AuthorizationRpc};
use stratagem_types::error::AuthzError;

use std::time::Duration;

/// HTTP client for the authorization RPC.
pub struct HttpAuthzClient {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

#[derive(Serialize)]
struct AccessCheckBody<'a> {
    project_id: &'a str,
    level: &'a str,
    user_id: Uuid,
}

#[derive(Deserialize)]
struct AccessCheckReply {
    allowed: bool,
}

impl HttpAuthzClient {
    /// Create a new client against `base_url` with the given request
    /// timeout. The timeout is deliberately short; a slow authorization
    /// service must not stall turn starts.
    pub fn new(base_url: impl Into<String>, token: SecretString, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }
}

impl AuthorizationRpc for HttpAuthzClient {
    async fn check_project_access(
        &self,
        project_id: &str,
        level: AccessLevel,
        user_id: Uuid,
    ) -> Result<bool, AuthzError> {
        let level = level.to_string();
        let body = AccessCheckBody {
            project_id,
            level: &level,
            user_id,
        };

        let response = self
            .client
            .post(format!("{}/v1/access/check", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthzError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthzError::Status(status.as_u16()));
        }

        let reply: AccessCheckReply = response
            .json()
            .await
            .map_err(|e| AuthzError::Decode(e.to_string()))?;

        Ok(reply.allowed)
    }
}
