use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, TodoSyncError};
use crate::interfaces::feeds::FeedFetcher;

pub const DEFAULT_USER_AGENT: &str = concat!("todo-sync/", env!("CARGO_PKG_VERSION"));

/// Fetches feeds over HTTP(S). `webcal://` URLs are requested as `https://`.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build()
            .map_err(|e| TodoSyncError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = transport_url(url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TodoSyncError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(TodoSyncError::Http(format!(
                "{url} returned status {status}: {snippet}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TodoSyncError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn transport_url(url: &str) -> String {
    match url.strip_prefix("webcal://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webcal_is_fetched_over_https() {
        assert_eq!(
            transport_url("webcal://example.com/team.ics"),
            "https://example.com/team.ics"
        );
        assert_eq!(
            transport_url("http://localhost:8080/a.ics"),
            "http://localhost:8080/a.ics"
        );
    }
}
