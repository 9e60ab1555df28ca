use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::db::default_db_path;
use crate::error::{Result, TodoSyncError};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_REFRESH_MINUTES: u64 = 60;
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeedsConfig {
    pub refresh_minutes: Option<u64>,
    pub fetch_timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub database: Option<DatabaseConfig>,
    pub feeds: Option<FeedsConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| TodoSyncError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| TodoSyncError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn resolve_host(&self) -> String {
        self.server
            .as_ref()
            .and_then(|server| server.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }

    pub fn resolve_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|server| server.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn resolve_sqlite_path(&self) -> String {
        self.database
            .as_ref()
            .and_then(|database| database.sqlite_path.clone())
            .unwrap_or_else(default_db_path)
    }

    /// At least one minute.
    pub fn resolve_refresh_interval(&self) -> Duration {
        let minutes = self
            .feeds
            .as_ref()
            .and_then(|feeds| feeds.refresh_minutes)
            .unwrap_or(DEFAULT_REFRESH_MINUTES);
        Duration::from_secs(minutes.max(1) * 60)
    }

    pub fn resolve_fetch_timeout(&self) -> Duration {
        let seconds = self
            .feeds
            .as_ref()
            .and_then(|feeds| feeds.fetch_timeout_seconds)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECONDS);
        Duration::from_secs(seconds.max(1))
    }

    pub fn resolve_user_agent(&self) -> Option<String> {
        self.feeds.as_ref().and_then(|feeds| feeds.user_agent.clone())
    }

    /// Apply command-line overrides on top of the file values.
    pub fn with_overrides(
        mut self,
        host: Option<String>,
        port: Option<u16>,
        sqlite_path: Option<String>,
    ) -> Self {
        if host.is_some() || port.is_some() {
            let server = self.server.get_or_insert_with(ServerConfig::default);
            if host.is_some() {
                server.host = host;
            }
            if port.is_some() {
                server.port = port;
            }
        }
        if sqlite_path.is_some() {
            self.database
                .get_or_insert_with(DatabaseConfig::default)
                .sqlite_path = sqlite_path;
        }
        self
    }
}
