use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment configuration. Secrets and deployment-specific values only;
/// everything tunable lives in the TOML `FileConfig`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Which vault's watchers this process owns.
    pub vault_id: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            vault_id: std::env::var("VAULT_ID").unwrap_or_else(|_| "default".to_string()),
        })
    }
}

/// TOML-backed configuration. Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub watchers: WatchersConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8470,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchersConfig {
    /// Pause between downloads within one cycle.
    pub courtesy_delay_ms: u64,
    /// Per-request deadline. 0 disables it.
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for WatchersConfig {
    fn default() -> Self {
        Self {
            courtesy_delay_ms: 1500,
            fetch_timeout_secs: 30,
            user_agent: "vault-watchers/0.1".to_string(),
        }
    }
}

impl WatchersConfig {
    pub fn courtesy_delay(&self) -> Duration {
        Duration::from_millis(self.courtesy_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Where ingested media files are written.
    pub dir: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./media"),
        }
    }
}

/// Load the TOML config. A missing file yields defaults; an unreadable or
/// malformed one is an error.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 8470);
        assert_eq!(config.watchers.courtesy_delay(), Duration::from_millis(1500));
        assert_eq!(config.watchers.fetch_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.media.dir, PathBuf::from("./media"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
            [server]
            port = 9000
            allowed_origins = ["http://localhost:3000"]

            [watchers]
            fetch_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.watchers.fetch_timeout(), None);
        assert_eq!(config.watchers.courtesy_delay_ms, 1500);
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(parse_config("[scraping]\nthreads = 4").is_err());
    }

    #[test]
    fn missing_file_is_default() {
        let config = load_config(Path::new("/nonexistent/vault-watcher.toml")).unwrap();
        assert_eq!(config.server.port, 8470);
    }
}
