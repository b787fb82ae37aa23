use std::time;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::error::FetchError;

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Download the full payload behind `url`. No retries, a failure ends the item.
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

pub fn build_http_client(request_timeout: time::Duration) -> reqwest::Result<Client> {
    reqwest::Client::builder()
        .user_agent("pix-processor thumbnail worker")
        .timeout(request_timeout)
        .build()
}

/// Fetches source images over HTTP(S). One client is shared by every item.
pub struct HttpFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(client: Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_owned(),
            error: e.to_string(),
        })?;

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(FetchError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let limit = self.max_bytes;
        if response
            .content_length()
            .is_some_and(|length| length > limit as u64)
        {
            return Err(FetchError::TooLarge { limit });
        }

        // Content-Length can be absent or wrong, so the limit is enforced while reading too
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(FetchError::Request)? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Bytes::from(body))
    }
}
