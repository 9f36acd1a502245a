// TMDB metadata provider service
// API Documentation: https://developer.themoviedb.org/reference/intro/getting-started

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// TMDB API client
pub struct TmdbClient {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct FindResults {
    movie_results: Option<Vec<FindEntry>>,
    tv_results: Option<Vec<FindEntry>>,
}

#[derive(Debug, Deserialize)]
struct FindEntry {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TvDetails {
    name: Option<String>,
    seasons: Option<Vec<SeasonSummary>>,
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeasonSummary {
    season_number: i32,
    episode_count: Option<u32>,
}

/// Per-season episode count, used for absolute-episode arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonEpisodes {
    pub season_number: u32,
    pub episode_count: u32,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
        }
    }

    /// Resolve a TMDB id from an IMDb id via the find endpoint.
    /// Movie results are checked first, then TV results.
    pub async fn find_by_imdb(&self, imdb_id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/find/{}?api_key={}&external_source=imdb_id",
            TMDB_API_BASE, imdb_id, self.api_key
        );

        let response: FindResults = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query TMDB find endpoint")?
            .json()
            .await
            .context("Failed to parse TMDB find response")?;

        let id = response
            .movie_results
            .and_then(|r| r.into_iter().next())
            .or_else(|| response.tv_results.and_then(|r| r.into_iter().next()))
            .map(|e| e.id.to_string());

        Ok(id)
    }

    /// Localized display title. Tries the TV endpoint first (most anime are
    /// series), then the movie endpoint.
    pub async fn localized_title(&self, tmdb_id: &str, language: &str) -> Result<Option<String>> {
        let tv_url = format!(
            "{}/tv/{}?api_key={}&language={}",
            TMDB_API_BASE, tmdb_id, self.api_key, language
        );
        if let Ok(details) = self.fetch_json::<TvDetails>(&tv_url).await {
            if details.name.is_some() {
                return Ok(details.name);
            }
        }

        let movie_url = format!(
            "{}/movie/{}?api_key={}&language={}",
            TMDB_API_BASE, tmdb_id, self.api_key, language
        );
        if let Ok(details) = self.fetch_json::<MovieDetails>(&movie_url).await {
            return Ok(details.title);
        }

        Ok(None)
    }

    /// Episode counts per season, specials excluded, ascending by season.
    pub async fn season_episode_counts(&self, tmdb_id: &str) -> Result<Vec<SeasonEpisodes>> {
        let url = format!("{}/tv/{}?api_key={}", TMDB_API_BASE, tmdb_id, self.api_key);
        let details: TvDetails = self
            .fetch_json(&url)
            .await
            .context("Failed to fetch TMDB TV details")?;

        let mut seasons: Vec<SeasonEpisodes> = details
            .seasons
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.season_number > 0)
            .map(|s| SeasonEpisodes {
                season_number: s.season_number as u32,
                episode_count: s.episode_count.unwrap_or(0),
            })
            .collect();
        seasons.sort_by_key(|s| s.season_number);
        Ok(seasons)
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("TMDB request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("TMDB returned status {}", response.status());
        }

        response.json().await.context("Failed to parse TMDB JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_season_summary_filters_specials() {
        let body = r#"{
            "name": "Some Show",
            "seasons": [
                {"season_number": 0, "episode_count": 3},
                {"season_number": 2, "episode_count": 12},
                {"season_number": 1, "episode_count": 10}
            ]
        }"#;
        let details: TvDetails = serde_json::from_str(body).unwrap();
        let mut seasons: Vec<SeasonEpisodes> = details
            .seasons
            .unwrap()
            .into_iter()
            .filter(|s| s.season_number > 0)
            .map(|s| SeasonEpisodes {
                season_number: s.season_number as u32,
                episode_count: s.episode_count.unwrap_or(0),
            })
            .collect();
        seasons.sort_by_key(|s| s.season_number);

        assert_eq!(seasons.len(), 2);
        assert_eq!(seasons[0].season_number, 1);
        assert_eq!(seasons[1].episode_count, 12);
    }

    #[test]
    fn test_find_results_prefer_movie_entries() {
        let body = r#"{
            "movie_results": [{"id": 603}],
            "tv_results": [{"id": 1399}]
        }"#;
        let parsed: FindResults = serde_json::from_str(body).unwrap();
        let id = parsed
            .movie_results
            .and_then(|r| r.into_iter().next())
            .or_else(|| parsed.tv_results.and_then(|r| r.into_iter().next()))
            .map(|e| e.id);
        assert_eq!(id, Some(603));
    }
}
