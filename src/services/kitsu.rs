// Kitsu metadata service client
// API Documentation: https://kitsu.docs.apiary.io/

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const KITSU_API_BASE: &str = "https://kitsu.io/api/edge";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KitsuClient {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct AnimeResponse {
    data: Option<AnimeData>,
}

#[derive(Debug, Deserialize)]
struct AnimeData {
    attributes: AnimeAttributes,
}

#[derive(Debug, Deserialize)]
struct AnimeAttributes {
    titles: Option<Titles>,
    #[serde(rename = "canonicalTitle")]
    canonical_title: Option<String>,
    #[serde(rename = "startDate")]
    start_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Titles {
    en: Option<String>,
    en_jp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MappingsResponse {
    #[serde(default)]
    data: Vec<MappingData>,
}

#[derive(Debug, Deserialize)]
struct MappingData {
    attributes: MappingAttributes,
}

#[derive(Debug, Deserialize)]
struct MappingAttributes {
    #[serde(rename = "externalSite")]
    external_site: Option<String>,
    #[serde(rename = "externalId")]
    external_id: Option<String>,
}

/// Title and air date for one Kitsu anime entry.
#[derive(Debug, Clone)]
pub struct KitsuDetails {
    pub title: String,
    pub start_date: Option<String>,
}

impl Default for KitsuClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KitsuClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Fetch display title and start date for an anime.
    /// Prefers the English title, then romaji, then the canonical one.
    pub async fn details(&self, kitsu_id: &str) -> Result<Option<KitsuDetails>> {
        let url = format!("{}/anime/{}", KITSU_API_BASE, kitsu_id);
        let response: AnimeResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query Kitsu")?
            .json()
            .await
            .context("Failed to parse Kitsu anime response")?;

        let Some(data) = response.data else {
            return Ok(None);
        };
        let attrs = data.attributes;

        let title = attrs
            .titles
            .as_ref()
            .and_then(|t| t.en.clone())
            .or_else(|| attrs.titles.as_ref().and_then(|t| t.en_jp.clone()))
            .or(attrs.canonical_title);

        Ok(title.map(|title| KitsuDetails {
            title,
            start_date: attrs.start_date,
        }))
    }

    /// Cross-reference a Kitsu entry to its MyAnimeList id via the
    /// mappings relationship.
    pub async fn mal_id(&self, kitsu_id: &str) -> Result<Option<String>> {
        let url = format!("{}/anime/{}/mappings", KITSU_API_BASE, kitsu_id);
        let response: MappingsResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query Kitsu mappings")?
            .json()
            .await
            .context("Failed to parse Kitsu mappings response")?;

        let mal = response.data.into_iter().find_map(|m| {
            let attrs = m.attributes;
            match attrs.external_site.as_deref() {
                Some("myanimelist/anime") => attrs.external_id,
                _ => None,
            }
        });
        Ok(mal)
    }
}
