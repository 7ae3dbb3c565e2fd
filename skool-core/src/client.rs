use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response, header};
use serde::de::DeserializeOwned;

use crate::{Error, Result, config::Config, retry::RetryPolicy};

/// Builder for the shared backend client
pub struct ApiClientBuilder {
    pub client_builder: ClientBuilder,
    pub endpoint: String,
    pub retry: RetryPolicy,
}

/// HTTP client bound to one backend endpoint
#[derive(Clone)]
pub struct ApiClient {
    pub client: Client,
    pub endpoint: String,
    pub retry: RetryPolicy,
}

impl ApiClientBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let client_builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("skool/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        Self {
            client_builder,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new(config.api_endpoint.clone());
        builder.client_builder = builder
            .client_builder
            .timeout(Duration::from_secs(config.timeout_secs));
        builder.retry = config.retry_policy();
        builder
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let client = self
            .client_builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(ApiClient {
            client,
            endpoint: self.endpoint,
            retry: self.retry,
        })
    }
}

impl ApiClient {
    /// Absolute URL for an API path such as `/auth/session`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Common transport error mapping
    pub fn handle_error_req(error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout
        } else {
            Error::Http(error)
        }
    }

    /// Turn a non-success response into an error carrying the body text.
    pub async fn check_response(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Error::from_status(status, &body))
        }
    }

    pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let body = Self::check_response(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
