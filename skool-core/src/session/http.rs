use async_trait::async_trait;

use super::{AuthBackend, CreateSessionRequest, CreateSessionResponse};
use crate::{LoginError, Result, client::ApiClient, retry::retrying_request};

/// Session endpoints over HTTP
#[derive(Clone)]
pub struct HttpAuthBackend {
    api: ApiClient,
}

impl HttpAuthBackend {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> std::result::Result<CreateSessionResponse, LoginError> {
        let url = self.api.url("/auth/session");

        let response = retrying_request(
            || self.api.client.post(&url).json(request).send(),
            self.api.retry,
        )
        .await
        .map_err(|e| LoginError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| LoginError::Unavailable(format!("Invalid session response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            let message = body.trim();
            Err(LoginError::Rejected(if message.is_empty() {
                status.to_string()
            } else {
                message.to_string()
            }))
        } else {
            Err(LoginError::Unavailable(format!("HTTP {} error", status)))
        }
    }

    async fn end_session(&self, session_token: &str) -> Result<()> {
        let url = self.api.url("/auth/logout");

        let response = retrying_request(
            || self.api.client.post(&url).bearer_auth(session_token).send(),
            self.api.retry,
        )
        .await
        .map_err(ApiClient::handle_error_req)?;

        ApiClient::check_response(response).await?;
        Ok(())
    }
}
