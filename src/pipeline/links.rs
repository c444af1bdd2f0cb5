//! Linked-page fetcher: dereferences URLs found in a message body.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChannelError;

/// User agent sent with page requests; some sites refuse the reqwest default.
const USER_AGENT: &str = "Mozilla/5.0";

/// Fetches the text of a linked page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, ChannelError>;
}

/// `PageFetcher` backed by reqwest.
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, ChannelError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        // Non-success bodies are searched too.
        let status = resp.status();
        if !status.is_success() {
            tracing::debug!(%url, %status, "Linked page returned non-success status");
        }

        resp.text()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))
    }
}
