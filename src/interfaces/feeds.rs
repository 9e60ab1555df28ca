use async_trait::async_trait;

use crate::error::Result;

/// Retrieves the raw body of a calendar feed.
///
/// Any error, including a non-success HTTP status, counts as a failed sync of
/// that one subscription.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
