// Jikan API client - Unofficial MyAnimeList API
// API Documentation: https://docs.api.jikan.moe/
// Rate limit: 3 requests/second, 60 requests/minute

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const JIKAN_API_BASE: &str = "https://api.jikan.moe/v4";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Jikan API client with rate limiting
pub struct JikanClient {
    client: Client,
    last_request: Arc<Mutex<Instant>>,
}

#[derive(Debug, Deserialize)]
struct JikanResponse {
    data: Option<JikanAnime>,
}

#[derive(Debug, Deserialize)]
struct JikanAnime {
    titles: Option<Vec<JikanTitle>>,
    title: Option<String>,
    title_english: Option<String>,
    title_japanese: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JikanTitle {
    #[serde(rename = "type")]
    title_type: Option<String>,
    title: Option<String>,
}

impl JikanClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            last_request: Arc::new(Mutex::new(Instant::now() - Duration::from_secs(1))),
        }
    }

    /// Enforce rate limiting (3 requests per second)
    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        let min_interval = Duration::from_millis(350); // ~3 req/sec with buffer

        if elapsed < min_interval {
            let wait = min_interval - elapsed;
            tracing::debug!("Jikan rate limit: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
        *last = Instant::now();
    }

    /// English title for a MAL id. Prefers the explicit "English" entry from
    /// the titles list (season-specific), falling back to title_english,
    /// the default title, then the Japanese title.
    pub async fn english_title(&self, mal_id: &str) -> Result<Option<String>> {
        self.rate_limit().await;

        let url = format!("{}/anime/{}", JIKAN_API_BASE, mal_id);
        let response: JikanResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query Jikan")?
            .json()
            .await
            .context("Failed to parse Jikan response")?;

        let Some(anime) = response.data else {
            return Ok(None);
        };

        if let Some(titles) = &anime.titles {
            let english = titles
                .iter()
                .find(|t| t.title_type.as_deref() == Some("English"))
                .and_then(|t| t.title.clone());
            if english.is_some() {
                return Ok(english);
            }
        }

        Ok(anime
            .title_english
            .or(anime.title)
            .or(anime.title_japanese))
    }
}

impl Default for JikanClient {
    fn default() -> Self {
        Self::new()
    }
}
