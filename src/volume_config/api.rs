// ABOUTME: Client for the remote volume configuration API.
// ABOUTME: Fetches raw tenant descriptors by hostname or worker id.

use super::VolumeQuery;
use crate::config::ApiConfig;
use crate::http::{HttpClient, HttpError};
use async_trait::async_trait;
use std::time::Duration;

/// Source of raw volume config payloads.
#[async_trait]
pub trait ConfigApi: Send + Sync {
    async fn fetch(&self, query: &VolumeQuery) -> Result<serde_json::Value, ApiError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no volume config for {0}")]
    NotFound(String),

    #[error("config API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("config API response is not JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] HttpError),
}

#[derive(Debug, Clone)]
pub struct HttpConfigApi {
    client: HttpClient,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpConfigApi {
    pub fn new(
        client: HttpClient,
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        }
    }

    /// Build from configuration, resolving the token from the environment.
    pub fn from_config(config: &ApiConfig, client: HttpClient) -> crate::error::Result<Self> {
        let token = config.token.as_ref().map(|t| t.resolve()).transpose()?;
        Ok(Self::new(client, config.url.clone(), token, config.timeout))
    }

    pub fn url_for(&self, query: &VolumeQuery) -> String {
        match query {
            VolumeQuery::WorkerId(id) => {
                format!("{}/volume/{}", self.base_url, urlencoding::encode(id.as_str()))
            }
            VolumeQuery::Hostname(hostname) => format!(
                "{}/volume?hostname={}",
                self.base_url,
                urlencoding::encode(hostname.as_str())
            ),
        }
    }
}

#[async_trait]
impl ConfigApi for HttpConfigApi {
    async fn fetch(&self, query: &VolumeQuery) -> Result<serde_json::Value, ApiError> {
        let mut headers = vec![("Accept", "application/json".to_string())];
        if let Some(token) = &self.token {
            headers.push(("Authorization", format!("Bearer {token}")));
        }

        let response = self
            .client
            .get(&self.url_for(query), &headers, self.timeout)
            .await?;
        match response.status {
            404 => Err(ApiError::NotFound(query.to_string())),
            _ if response.is_success() => Ok(serde_json::from_slice(&response.body)?),
            status => Err(ApiError::Status {
                status,
                body: response.text(),
            }),
        }
    }
}
