// Companion scraper subprocess client.
//
// The provider site is scraped by an external script that speaks JSON on
// stdout. Each invocation is one-shot: spawn, wait with a deadline, parse.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("failed to spawn scraper: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("scraper timed out after {0:?}")]
    Timeout(Duration),
    #[error("scraper exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("failed to parse scraper output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One search hit from the provider catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub name_it: Option<String>,
    pub name_eng: Option<String>,
    pub episodes_count: Option<u32>,
}

/// One episode of a catalogue entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeEntry {
    pub id: i64,
    pub number: String,
    pub name: Option<String>,
}

/// Stream endpoints for one episode.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamData {
    pub episode_page: String,
    pub embed_url: Option<String>,
    pub mp4_url: Option<String>,
}

pub struct ScraperClient {
    script_path: PathBuf,
    timeout: Duration,
}

impl ScraperClient {
    pub fn new(script_path: PathBuf, timeout: Duration) -> Self {
        Self {
            script_path,
            timeout,
        }
    }

    pub async fn search(&self, query: &str, dubbed: bool) -> Result<Vec<SearchResult>, ScraperError> {
        let mut args = vec!["search".to_string(), "--query".to_string(), query.to_string()];
        if dubbed {
            args.push("--dubbed".to_string());
        }
        self.invoke(&args).await
    }

    pub async fn episodes(&self, anime_id: i64) -> Result<Vec<EpisodeEntry>, ScraperError> {
        let args = [
            "get_episodes".to_string(),
            "--anime-id".to_string(),
            anime_id.to_string(),
        ];
        self.invoke(&args).await
    }

    pub async fn stream(
        &self,
        anime_id: i64,
        anime_slug: &str,
        episode_id: i64,
    ) -> Result<StreamData, ScraperError> {
        let args = [
            "get_stream".to_string(),
            "--anime-id".to_string(),
            anime_id.to_string(),
            "--anime-slug".to_string(),
            anime_slug.to_string(),
            "--episode-id".to_string(),
            episode_id.to_string(),
        ];
        self.invoke(&args).await
    }

    async fn invoke<T: serde::de::DeserializeOwned>(
        &self,
        args: &[String],
    ) -> Result<T, ScraperError> {
        debug!("spawning scraper: {:?}", args);
        let start = std::time::Instant::now();

        let child = Command::new("python3")
            .arg(&self.script_path)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // kill_on_drop reaps the child when the timeout wins the race.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                error!("scraper timed out after {:?} for {:?}", self.timeout, args);
                return Err(ScraperError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!(
                "scraper exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
            return Err(ScraperError::Exit {
                code: output.status.code(),
                stderr,
            });
        }

        debug!("scraper finished in {:?}", start.elapsed());
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_results() {
        let body = r#"[
            {"id": 1, "slug": "one-piece", "name": "One Piece", "name_eng": "One Piece", "episodes_count": 1100},
            {"id": 2, "slug": "one-piece-ita", "name": "One Piece (ITA)", "episodes_count": 500}
        ]"#;
        let results: Vec<SearchResult> = serde_json::from_str(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].slug, "one-piece");
        assert_eq!(results[1].name_eng, None);
    }

    #[test]
    fn test_parse_episode_entries_with_string_numbers() {
        let body = r#"[{"id": 42, "number": "1", "name": "Romance Dawn"}, {"id": 43, "number": "2"}]"#;
        let episodes: Vec<EpisodeEntry> = serde_json::from_str(body).unwrap();
        assert_eq!(episodes[0].number, "1");
        assert!(episodes[1].name.is_none());
    }

    #[test]
    fn test_parse_stream_data_without_mp4() {
        let body = r#"{"episode_page": "https://example.org/ep/1", "embed_url": "https://embed.example.org/e/xyz", "mp4_url": null}"#;
        let data: StreamData = serde_json::from_str(body).unwrap();
        assert!(data.mp4_url.is_none());
        assert_eq!(data.episode_page, "https://example.org/ep/1");
    }
}
