pub mod fetch;

pub use fetch::HttpFeedFetcher;
