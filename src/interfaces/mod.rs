pub mod feeds;
pub mod scheduler;
