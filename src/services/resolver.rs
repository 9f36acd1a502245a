// Identifier resolution cascade.
//
// Turns a content identifier (kitsu/mal/imdb/tmdb) into a canonical
// English title plus cross-referenced ids, trying the most specific
// source first and degrading gracefully:
//
//   kitsu: mapping service + Kitsu details in parallel, then Jikan by
//          mal id, then Kitsu's own mappings, then the Kitsu canonical
//          title, then TMDB as a last resort.
//   mal:   Jikan directly.
//   imdb:  TMDB find + mapping service in parallel, then the same
//          Jikan / title-hint / ARM / TMDB ladder as tmdb ids.
//   tmdb:  mapping service, Jikan, title hints, ARM, TMDB title.
//
// Successful resolutions are cached; failures are not, so transient
// upstream outages retry on the next request.

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{ContentIdentifier, EpisodeMode, IdNamespace, ResolvedMetadata};
use crate::services::cache::MetadataCache;
use crate::services::haglund::HaglundClient;
use crate::services::jikan::JikanClient;
use crate::services::kitsu::KitsuClient;
use crate::services::mapping::{MappingClient, MappingRecord};
use crate::services::tmdb::{SeasonEpisodes, TmdbClient};

pub struct Resolver {
    cache: MetadataCache,
    mapping: MappingClient,
    kitsu: KitsuClient,
    jikan: JikanClient,
    haglund: HaglundClient,
    tmdb: Option<TmdbClient>,
}

/// Convert a seasonal (season, episode) pair into an absolute episode
/// number by summing the episode counts of all earlier seasons.
///
/// Season 1 requests pass through unchanged. An episode number already
/// larger than its season's count is assumed to be absolute already and
/// is also left alone.
pub fn calculate_absolute_episode(
    seasons: &[SeasonEpisodes],
    target_season: u32,
    episode: u32,
) -> u32 {
    if target_season <= 1 {
        return episode;
    }
    if let Some(current) = seasons.iter().find(|s| s.season_number == target_season) {
        if episode > current.episode_count {
            return episode;
        }
    }
    let offset: u32 = seasons
        .iter()
        .filter(|s| s.season_number < target_season)
        .map(|s| s.episode_count)
        .sum();
    offset + episode
}

fn opt_string(v: Option<i64>) -> Option<String> {
    v.map(|n| n.to_string())
}

impl Resolver {
    pub fn new(
        ttl: Duration,
        capacity: usize,
        tmdb_api_key: Option<String>,
    ) -> Self {
        Self {
            cache: MetadataCache::new(ttl, capacity),
            mapping: MappingClient::default(),
            kitsu: KitsuClient::new(),
            jikan: JikanClient::new(),
            haglund: HaglundClient::new(),
            tmdb: tmdb_api_key.map(TmdbClient::new),
        }
    }

    /// Resolve an identifier to canonical metadata, consulting the cache
    /// first. On a cache hit for an absolute-numbered series the stored
    /// entry is cloned and its absolute episode recomputed for the
    /// requested episode; the cached entry itself is never mutated.
    pub async fn resolve(&self, ident: &ContentIdentifier) -> Result<Option<ResolvedMetadata>> {
        let cache_key = ident.cache_key();

        if let Some(cached) = self.cache.get(&cache_key) {
            if let Some(patched) = self.recalc_for_hit(&cached, ident).await {
                info!(
                    "cache hit with episode recalc: {} -> \"{}\"",
                    cache_key, patched.canonical_title
                );
                return Ok(Some(patched));
            }
            info!("cache hit: {} -> \"{}\"", cache_key, cached.canonical_title);
            return Ok(Some(cached));
        }

        info!("resolving {}", cache_key);
        let resolved = match ident.namespace {
            IdNamespace::Kitsu => self.resolve_from_kitsu(ident).await?,
            IdNamespace::Mal => self.resolve_from_mal(ident).await?,
            IdNamespace::Imdb => self.resolve_from_imdb(ident).await?,
            IdNamespace::Tmdb => self.resolve_from_tmdb(ident).await?,
        };

        match &resolved {
            Some(meta) => {
                self.cache.put(&cache_key, meta.clone());
                info!(
                    "resolved {} -> \"{}\" (mal={:?}, kitsu={:?}, tmdb={:?}, mode={:?}, abs_ep={:?})",
                    cache_key,
                    meta.canonical_title,
                    meta.mal_id,
                    meta.kitsu_id,
                    meta.tmdb_id,
                    meta.episode_mode,
                    meta.absolute_episode
                );
            }
            None => warn!("resolution failed for {}", cache_key),
        }

        Ok(resolved)
    }

    /// For imdb/tmdb series with absolute numbering, the cached entry's
    /// absolute episode belongs to whichever episode was requested first.
    /// Recompute it for this request without touching the stored entry.
    async fn recalc_for_hit(
        &self,
        cached: &ResolvedMetadata,
        ident: &ContentIdentifier,
    ) -> Option<ResolvedMetadata> {
        if !matches!(ident.namespace, IdNamespace::Imdb | IdNamespace::Tmdb) {
            return None;
        }
        if cached.episode_mode != EpisodeMode::Absolute {
            return None;
        }
        let season = ident.season.filter(|&s| s > 1)?;
        let episode = ident.episode?;
        let tmdb_id = cached.tmdb_id.as_deref()?;
        let tmdb = self.tmdb.as_ref()?;

        let seasons = tmdb.season_episode_counts(tmdb_id).await.ok()?;
        if seasons.is_empty() {
            return None;
        }
        let mut patched = cached.clone();
        patched.absolute_episode = Some(calculate_absolute_episode(&seasons, season, episode));
        Some(patched)
    }

    async fn resolve_from_kitsu(
        &self,
        ident: &ContentIdentifier,
    ) -> Result<Option<ResolvedMetadata>> {
        let kitsu_id = &ident.id;

        // Both lookups are independent; issue them together.
        let (mapping, details) = tokio::join!(
            self.mapping.by_kitsu(kitsu_id),
            self.kitsu.details(kitsu_id)
        );
        let mapping = mapping.unwrap_or_else(|e| {
            debug!("mapping service unavailable: {:#}", e);
            None
        });
        let details = details.unwrap_or_else(|e| {
            debug!("kitsu details unavailable: {:#}", e);
            None
        });

        let mut meta = ResolvedMetadata {
            canonical_title: String::new(),
            mal_id: None,
            kitsu_id: Some(kitsu_id.clone()),
            tmdb_id: None,
            imdb_id: None,
            title_hints: Vec::new(),
            episode_mode: EpisodeMode::Unknown,
            mapped_seasons: Vec::new(),
            absolute_episode: None,
            start_date: details.as_ref().and_then(|d| d.start_date.clone()),
        };
        let kitsu_canonical = details.map(|d| d.title);

        if let Some(record) = mapping {
            apply_mapping_record(&mut meta, &record);
            debug!(
                "mapping hit for kitsu:{}: tmdb={:?}, mal={:?}",
                kitsu_id, meta.tmdb_id, meta.mal_id
            );
        }

        // Jikan gives the season-specific English title, preferred over
        // everything else.
        if let Some(mal_id) = meta.mal_id.clone() {
            if let Some(title) = self.jikan_title(&mal_id).await {
                meta.canonical_title = title;
                return Ok(Some(meta));
            }
        }

        // Mapping service had no mal id: Kitsu's own mappings may.
        if meta.mal_id.is_none() {
            if let Ok(Some(mal_id)) = self.kitsu.mal_id(kitsu_id).await {
                debug!("kitsu mappings gave mal id {}", mal_id);
                meta.mal_id = Some(mal_id.clone());
                if let Some(title) = self.jikan_title(&mal_id).await {
                    meta.canonical_title = title;
                    return Ok(Some(meta));
                }
            }
        }

        if let Some(title) = kitsu_canonical {
            debug!("falling back to kitsu canonical title \"{}\"", title);
            meta.canonical_title = title;
            return Ok(Some(meta));
        }

        if let (Some(tmdb_id), Some(tmdb)) = (meta.tmdb_id.clone(), self.tmdb.as_ref()) {
            if let Ok(Some(title)) = tmdb.localized_title(&tmdb_id, "en-US").await {
                debug!("falling back to tmdb title \"{}\"", title);
                meta.canonical_title = title;
                return Ok(Some(meta));
            }
        }

        Ok(None)
    }

    async fn resolve_from_mal(
        &self,
        ident: &ContentIdentifier,
    ) -> Result<Option<ResolvedMetadata>> {
        let Some(title) = self.jikan_title(&ident.id).await else {
            return Ok(None);
        };
        Ok(Some(ResolvedMetadata {
            canonical_title: title,
            mal_id: Some(ident.id.clone()),
            kitsu_id: None,
            tmdb_id: None,
            imdb_id: None,
            title_hints: Vec::new(),
            episode_mode: EpisodeMode::Unknown,
            mapped_seasons: Vec::new(),
            absolute_episode: None,
            start_date: None,
        }))
    }

    async fn resolve_from_imdb(
        &self,
        ident: &ContentIdentifier,
    ) -> Result<Option<ResolvedMetadata>> {
        let imdb_id = &ident.id;
        let season = ident.season.unwrap_or(1);

        let tmdb_lookup = async {
            match self.tmdb.as_ref() {
                Some(tmdb) => tmdb.find_by_imdb(imdb_id).await.unwrap_or_else(|e| {
                    debug!("tmdb find failed: {:#}", e);
                    None
                }),
                None => None,
            }
        };
        let (tmdb_id, mapping) = tokio::join!(tmdb_lookup, self.mapping.by_imdb(imdb_id, season));
        let mapping = mapping.unwrap_or_else(|e| {
            debug!("mapping service unavailable: {:#}", e);
            None
        });

        let mut meta = ResolvedMetadata {
            canonical_title: String::new(),
            mal_id: None,
            kitsu_id: None,
            tmdb_id,
            imdb_id: Some(imdb_id.clone()),
            title_hints: Vec::new(),
            episode_mode: EpisodeMode::Unknown,
            mapped_seasons: Vec::new(),
            absolute_episode: None,
            start_date: None,
        };
        if let Some(record) = mapping {
            // The find endpoint's tmdb id wins; the record only fills gaps.
            apply_mapping_record(&mut meta, &record);
        }

        self.finish_series_resolution(meta, ident).await
    }

    async fn resolve_from_tmdb(
        &self,
        ident: &ContentIdentifier,
    ) -> Result<Option<ResolvedMetadata>> {
        let tmdb_id = &ident.id;
        let season = ident.season.unwrap_or(1);

        let mapping = self
            .mapping
            .by_tmdb(tmdb_id, season)
            .await
            .unwrap_or_else(|e| {
                debug!("mapping service unavailable: {:#}", e);
                None
            });

        let mut meta = ResolvedMetadata {
            canonical_title: String::new(),
            mal_id: None,
            kitsu_id: None,
            tmdb_id: Some(tmdb_id.clone()),
            imdb_id: None,
            title_hints: Vec::new(),
            episode_mode: EpisodeMode::Unknown,
            mapped_seasons: Vec::new(),
            absolute_episode: None,
            start_date: None,
        };
        if let Some(record) = mapping {
            apply_mapping_record(&mut meta, &record);
        }

        self.finish_series_resolution(meta, ident).await
    }

    /// Shared tail of the imdb/tmdb cascades: absolute episode arithmetic,
    /// then the Jikan / title-hint / ARM / TMDB title ladder.
    async fn finish_series_resolution(
        &self,
        mut meta: ResolvedMetadata,
        ident: &ContentIdentifier,
    ) -> Result<Option<ResolvedMetadata>> {
        if meta.episode_mode == EpisodeMode::Absolute {
            if let (Some(season), Some(episode), Some(tmdb_id), Some(tmdb)) = (
                ident.season.filter(|&s| s > 1),
                ident.episode,
                meta.tmdb_id.as_deref(),
                self.tmdb.as_ref(),
            ) {
                if let Ok(seasons) = tmdb.season_episode_counts(tmdb_id).await {
                    if !seasons.is_empty() {
                        let abs = calculate_absolute_episode(&seasons, season, episode);
                        debug!("absolute episode: S{}E{} -> {}", season, episode, abs);
                        meta.absolute_episode = Some(abs);
                    }
                }
            }
        }

        if let Some(mal_id) = meta.mal_id.clone() {
            if let Some(title) = self.jikan_title(&mal_id).await {
                meta.canonical_title = title;
                return Ok(Some(meta));
            }
        }

        if let Some(hint) = meta.title_hints.first() {
            debug!("falling back to title hint \"{}\"", hint);
            meta.canonical_title = hint.clone();
            return Ok(Some(meta));
        }

        if meta.mal_id.is_none() {
            if let Some(tmdb_id) = meta.tmdb_id.clone() {
                if let Ok(entries) = self.haglund.by_tmdb(&tmdb_id).await {
                    if let Some(first) = entries.first() {
                        meta.mal_id = opt_string(first.myanimelist);
                        if meta.kitsu_id.is_none() {
                            meta.kitsu_id = opt_string(first.kitsu);
                        }
                        if let Some(mal_id) = meta.mal_id.clone() {
                            if let Some(title) = self.jikan_title(&mal_id).await {
                                meta.canonical_title = title;
                                return Ok(Some(meta));
                            }
                        }
                    }
                }
            }
        }

        if let (Some(tmdb_id), Some(tmdb)) = (meta.tmdb_id.clone(), self.tmdb.as_ref()) {
            if let Ok(Some(title)) = tmdb.localized_title(&tmdb_id, "en-US").await {
                debug!("falling back to tmdb title \"{}\"", title);
                meta.canonical_title = title;
                return Ok(Some(meta));
            }
        }

        Ok(None)
    }

    async fn jikan_title(&self, mal_id: &str) -> Option<String> {
        match self.jikan.english_title(mal_id).await {
            Ok(title) => title,
            Err(e) => {
                debug!("jikan lookup failed for mal {}: {:#}", mal_id, e);
                None
            }
        }
    }
}

fn apply_mapping_record(meta: &mut ResolvedMetadata, record: &MappingRecord) {
    if meta.kitsu_id.is_none() {
        meta.kitsu_id = opt_string(record.kitsu_id);
    }
    meta.mal_id = opt_string(record.mal_id);
    if meta.tmdb_id.is_none() {
        meta.tmdb_id = opt_string(record.tmdb_id);
    }
    if meta.imdb_id.is_none() {
        meta.imdb_id = record.imdb_id.clone();
    }
    meta.title_hints = record.title_hints.clone();
    if let Some(mode) = record.episode_mode.as_deref() {
        meta.episode_mode = EpisodeMode::from_str_loose(mode);
    }
    meta.mapped_seasons = record
        .mapped_seasons
        .iter()
        .copied()
        .filter(|&n| n > 0)
        .collect();
}
