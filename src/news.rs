use std::time::Duration;

use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::NewsConfig;

/// An article from the external headlines API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeadlinesResponse {
    #[serde(default)]
    articles: Option<Vec<RawArticle>>,
}

// The API sends `null` for most fields on some articles.
#[derive(Debug, Deserialize)]
struct RawArticle {
    title: Option<String>,
    description: Option<String>,
    author: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    url: Option<String>,
}

impl From<RawArticle> for Article {
    fn from(raw: RawArticle) -> Self {
        Article {
            title: raw.title.unwrap_or_else(|| "Untitled".to_string()),
            description: raw.description,
            author: raw.author,
            published_at: raw.published_at,
            url: raw.url,
        }
    }
}

pub struct NewsClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl NewsClient {
    pub fn new(config: &NewsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("BroadView/1.0 (Blog)")
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Best effort: any failure yields an empty list so the home feed can
    /// still show local blogs.
    pub async fn fetch_top_headlines(&self) -> Vec<Article> {
        if !self.is_enabled() {
            debug!("news API key not configured, skipping headlines");
            return Vec::new();
        }

        match self.try_fetch().await {
            Ok(articles) => {
                info!("Fetched {} headlines", articles.len());
                articles
            }
            Err(e) => {
                warn!("Failed to fetch headlines from {}: {}", self.api_url, e);
                Vec::new()
            }
        }
    }

    async fn try_fetch(&self) -> anyhow::Result<Vec<Article>> {
        let response = self
            .client
            .get(&self.api_url)
            .header(header::AUTHORIZATION, self.api_key.as_str())
            .send()
            .await?
            .error_for_status()?;

        let body: HeadlinesResponse = response.json().await?;
        Ok(body
            .articles
            .unwrap_or_default()
            .into_iter()
            .map(Article::from)
            .collect())
    }
}
