// ARM (anime relations mapping) service client
// https://arm.haglund.dev/docs - maps TMDB ids onto kitsu/mal ids.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const ARM_API_BASE: &str = "https://arm.haglund.dev/api/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HaglundClient {
    client: Client,
}

/// One relation entry. The service returns an array because a single
/// TMDB series can span several anime entries (one per season/cour).
#[derive(Debug, Clone, Deserialize)]
pub struct ArmEntry {
    pub kitsu: Option<i64>,
    pub myanimelist: Option<i64>,
}

impl Default for HaglundClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HaglundClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Look up kitsu/mal relations for a TMDB id. Entries are returned
    /// in the service's order; the caller picks per season.
    pub async fn by_tmdb(&self, tmdb_id: &str) -> Result<Vec<ArmEntry>> {
        let url = format!(
            "{}/themoviedb?id={}&include=kitsu,myanimelist",
            ARM_API_BASE, tmdb_id
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query ARM service")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        if !response.status().is_success() {
            anyhow::bail!("ARM service returned status {}", response.status());
        }

        let entries: Vec<Option<ArmEntry>> = response
            .json()
            .await
            .context("Failed to parse ARM response")?;

        Ok(entries.into_iter().flatten().collect())
    }
}
