use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Key used to sign session cookies
    pub session_secret: String,
    /// How long a session stays valid after it is issued
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default)]
    pub news: NewsConfig,
}

/// Sessions may not outlive a year.
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite:broad_view.db?mode=rwc".to_string()
}

fn default_session_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    #[serde(default = "default_news_api_url")]
    pub api_url: String,
    /// An empty key disables the news segment of the home feed
    #[serde(default)]
    pub api_key: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_news_api_url() -> String {
    "https://newsapi.org/v2/top-headlines?language=en&category=technology".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            api_url: default_news_api_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Override file settings with any of `DATABASE_URL`, `LISTEN_ADDR`,
    /// `SESSION_SECRET` and `NEWS_API_KEY` found in the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(addr) = lookup("LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(secret) = lookup("SESSION_SECRET") {
            self.session_secret = secret;
        }
        if let Some(key) = lookup("NEWS_API_KEY") {
            self.news.api_key = key;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session_secret.trim().is_empty() {
            anyhow::bail!("session_secret must not be empty");
        }
        if self.session_ttl_secs == 0 || self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            anyhow::bail!(
                "session_ttl_secs must be between 1 and {}",
                MAX_SESSION_TTL_SECS
            );
        }
        if self.news.timeout_secs == 0 {
            anyhow::bail!("news.timeout_secs must be positive");
        }
        Ok(())
    }
}
