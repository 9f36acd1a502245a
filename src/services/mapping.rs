// Community anime mapping service client
// Cross-references kitsu/mal/tmdb/imdb identifiers and carries
// per-entry episode numbering hints.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BASE_URL: &str = "https://animemapping.stremio.dpdns.org";

pub struct MappingClient {
    client: Client,
    base_url: String,
}

/// One mapping record as returned by the service. All id fields are
/// optional because coverage varies per entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRecord {
    pub kitsu_id: Option<i64>,
    pub mal_id: Option<i64>,
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub title_hints: Vec<String>,
    pub episode_mode: Option<String>,
    #[serde(default)]
    pub mapped_seasons: Vec<u32>,
}

impl Default for MappingClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL.to_string())
    }
}

impl MappingClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url,
        }
    }

    /// Direct lookup by Kitsu id.
    pub async fn by_kitsu(&self, kitsu_id: &str) -> Result<Option<MappingRecord>> {
        let url = format!("{}/mapping/{}", self.base_url, kitsu_id);
        self.fetch(&url).await
    }

    /// Reverse lookup by IMDb id, scoped to a season.
    pub async fn by_imdb(&self, imdb_id: &str, season: u32) -> Result<Option<MappingRecord>> {
        let url = format!(
            "{}/mapping/by-imdb/{}?season={}",
            self.base_url, imdb_id, season
        );
        self.fetch(&url).await
    }

    /// Reverse lookup by TMDB id, scoped to a season.
    pub async fn by_tmdb(&self, tmdb_id: &str, season: u32) -> Result<Option<MappingRecord>> {
        let url = format!(
            "{}/mapping/by-tmdb/{}?season={}",
            self.base_url, tmdb_id, season
        );
        self.fetch(&url).await
    }

    async fn fetch(&self, url: &str) -> Result<Option<MappingRecord>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Mapping service request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("No mapping entry at {}", url);
            return Ok(None);
        }

        if !response.status().is_success() {
            anyhow::bail!("Mapping service returned status {}", response.status());
        }

        let record: MappingRecord = response
            .json()
            .await
            .context("Failed to parse mapping response")?;
        Ok(Some(record))
    }
}
