// End-to-end identifier-to-stream pipeline.
//
// One request flows: identifier -> resolution cascade -> provider search
// (sub + dub) -> per-version episode lookup and stream extraction ->
// aggregation, dedup and quality filtering. Any single version failing
// only shrinks the candidate list, it never fails the request.

use anyhow::Result;
use futures::future::join_all;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::extractor::{self, manifest, HostPageClient};
use crate::models::{
    ContentIdentifier, LanguageTag, QualityTag, ResolvedMetadata, SourceVersion, StreamCandidate,
};
use crate::services::mediaflow::{self, MediaFlowClient};
use crate::services::resolver::Resolver;
use crate::services::scraper::{EpisodeEntry, ScraperClient, SearchResult, StreamData};

const STREAM_HOST: &str = "VixCloud";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const FHD_PAGE_MARKER: &str = "window.canPlayFHD = true";

pub struct Pipeline {
    resolver: Resolver,
    scraper: Option<ScraperClient>,
    mediaflow: Option<MediaFlowClient>,
    pages: HostPageClient,
    auto_wanted: bool,
    high_wanted: bool,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Self {
        let resolver = Resolver::new(
            Duration::from_secs(config.cache.ttl_seconds),
            config.cache.capacity,
            config.tmdb_api_key.clone(),
        );
        let scraper = config.scraper.script_path.clone().map(|path| {
            ScraperClient::new(path, Duration::from_millis(config.scraper.timeout_ms))
        });
        let mediaflow = match (&config.proxy.mfp_url, &config.proxy.mfp_password) {
            (Some(url), Some(password)) => {
                Some(MediaFlowClient::new(url.clone(), password.clone()))
            }
            _ => None,
        };
        Self {
            resolver,
            scraper,
            mediaflow,
            pages: HostPageClient::new(),
            auto_wanted: config.quality.auto_wanted(),
            high_wanted: config.quality.high_wanted(),
        }
    }

    /// Run the full pipeline for one identifier.
    pub async fn run(&self, ident: &ContentIdentifier) -> Result<Vec<StreamCandidate>> {
        let Some(scraper) = self.scraper.as_ref() else {
            warn!("no scraper script configured, returning no candidates");
            return Ok(Vec::new());
        };
        if self.mediaflow.is_none() {
            // No forwarding proxy means no playable links at all.
            warn!("no stream proxy configured, returning no candidates");
            return Ok(Vec::new());
        }

        let Some(meta) = self.resolver.resolve(ident).await? else {
            warn!("could not resolve {}", ident.cache_key());
            return Ok(Vec::new());
        };

        let versions = self.search_versions(scraper, &meta).await;
        if versions.is_empty() {
            warn!("no provider entries for \"{}\"", meta.canonical_title);
            return Ok(Vec::new());
        }
        info!(
            "\"{}\": {} provider version(s)",
            meta.canonical_title,
            versions.len()
        );

        let season = ident.season.unwrap_or(1);
        // Absolute-numbered series are listed by absolute episode on the
        // provider side.
        let episode = meta.absolute_episode.or(ident.episode);
        let is_movie = ident.is_movie();

        let extractions = versions.iter().map(|version| async move {
            match self
                .extract_version(scraper, version, season, episode, is_movie)
                .await
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("version \"{}\" failed: {:#}", version.display_name, e);
                    Vec::new()
                }
            }
        });
        let merged: Vec<StreamCandidate> =
            join_all(extractions).await.into_iter().flatten().collect();

        Ok(self.finalize(merged))
    }

    /// Search the provider in both subbed and dubbed catalogues, merging
    /// and deduplicating by (name, id). Falls back through the resolver's
    /// title hints when the canonical title finds nothing.
    async fn search_versions(
        &self,
        scraper: &ScraperClient,
        meta: &ResolvedMetadata,
    ) -> Vec<SourceVersion> {
        let mut versions = self.search_both(scraper, &meta.canonical_title).await;
        if versions.is_empty() {
            for hint in &meta.title_hints {
                if hint.is_empty() || hint == &meta.canonical_title {
                    continue;
                }
                debug!("retrying search with title hint \"{}\"", hint);
                versions = self.search_both(scraper, hint).await;
                if !versions.is_empty() {
                    break;
                }
            }
        }
        versions
    }

    async fn search_both(&self, scraper: &ScraperClient, query: &str) -> Vec<SourceVersion> {
        let (sub, dub) = tokio::join!(scraper.search(query, false), scraper.search(query, true));
        let sub = sub.unwrap_or_else(|e| {
            debug!("sub search failed: {}", e);
            Vec::new()
        });
        let dub = dub.unwrap_or_else(|e| {
            debug!("dub search failed: {}", e);
            Vec::new()
        });

        let query_base = base_title(query);
        let mut seen = HashSet::new();
        let mut versions = Vec::new();
        for result in sub.into_iter().chain(dub) {
            if result.name.is_empty() {
                continue;
            }
            if !matches_query(&result, &query_base) {
                debug!("dropping unrelated hit \"{}\"", result.name);
                continue;
            }
            let key = format!("{}|{}", result.name, result.id);
            if !seen.insert(key) {
                continue;
            }
            versions.push(SourceVersion {
                provider_id: result.id,
                slug: result.slug,
                language_tag: LanguageTag::from_display_name(&result.name),
                display_name: result.name,
                episode_count: result.episodes_count,
            });
        }
        versions
    }

    async fn extract_version(
        &self,
        scraper: &ScraperClient,
        version: &SourceVersion,
        season: u32,
        episode: Option<u32>,
        is_movie: bool,
    ) -> Result<Vec<StreamCandidate>> {
        if episode_out_of_range(version.episode_count, episode) {
            debug!(
                "\"{}\" lists {:?} episodes, skipping E{:?}",
                version.display_name, version.episode_count, episode
            );
            return Ok(Vec::new());
        }

        let episodes = scraper.episodes(version.provider_id).await?;
        let Some(target) = select_episode(&episodes, episode, is_movie) else {
            warn!(
                "no matching episode S{}E{:?} in \"{}\"",
                season, episode, version.display_name
            );
            return Ok(Vec::new());
        };

        let stream = scraper
            .stream(version.provider_id, &version.slug, target.id)
            .await?;

        // Checked above in run(); extraction is never reached without it.
        let Some(mediaflow) = self.mediaflow.as_ref() else {
            return Ok(Vec::new());
        };

        let title = candidate_title(&version.display_name, &version.language_tag, season, episode);

        let Some(embed_url) = stream.embed_url.as_deref() else {
            debug!("\"{}\" has no embed page", version.display_name);
            return Ok(mp4_fallback(mediaflow, &stream, &title, &version.slug));
        };

        let page = match self.pages.fetch(embed_url, &stream.episode_page).await {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    "embed page fetch failed for \"{}\": {:#}",
                    version.display_name, e
                );
                return Ok(mp4_fallback(mediaflow, &stream, &title, &version.slug));
            }
        };
        let Some(decoded_url) = extractor::decode_stream_url(&page) else {
            warn!("could not recover media address for \"{}\"", version.display_name);
            return Ok(mp4_fallback(mediaflow, &stream, &title, &version.slug));
        };

        let headers = playback_headers(&stream.episode_page);
        let mut candidates = Vec::new();

        // The proxied master manifest is the Auto candidate.
        let mut auto_url = mediaflow.playable_url(STREAM_HOST, &decoded_url).await;
        if page.contains(FHD_PAGE_MARKER) {
            auto_url = mediaflow::inject_fhd_flag(&auto_url);
        }
        candidates.push(StreamCandidate {
            title: title.clone(),
            url: auto_url.clone(),
            referer: stream.episode_page.clone(),
            request_headers: headers.clone(),
            quality: QualityTag::Auto,
            source_tag: version.slug.clone(),
        });

        // Probe the proxied master for an explicit best rendition. Variant
        // references resolve against the proxy address, so the rendition
        // candidate is delivered through the proxy like the Auto one.
        let probe = self
            .pages
            .fetch_manifest(&auto_url, &stream.episode_page)
            .await;
        match probe {
            Ok(body) if manifest::is_master_manifest(&body) => {
                let variants = manifest::parse_variants(&body, &auto_url);
                if let Some(best) = manifest::select_best(variants) {
                    let quality = if best.height >= manifest::FHD_MIN_HEIGHT {
                        QualityTag::High
                    } else {
                        QualityTag::Auto
                    };
                    debug!(
                        "best rendition for \"{}\": {}p ({:?})",
                        version.display_name, best.height, quality
                    );
                    candidates.push(StreamCandidate {
                        title,
                        url: best.url,
                        referer: stream.episode_page,
                        request_headers: headers,
                        quality,
                        source_tag: version.slug.clone(),
                    });
                }
            }
            Ok(_) => debug!("media playlist, no renditions to pick"),
            Err(e) => debug!("manifest probe failed: {:#}", e),
        }

        Ok(candidates)
    }

    /// Global dedup (first occurrence wins) followed by the quality
    /// policy: Auto candidates when auto is wanted, High when high is,
    /// and Auto by default when nothing was selected.
    fn finalize(&self, merged: Vec<StreamCandidate>) -> Vec<StreamCandidate> {
        let mut seen = HashSet::new();
        merged
            .into_iter()
            .filter(|c| seen.insert(c.url.clone()))
            .filter(|c| match c.quality {
                QualityTag::High => self.high_wanted,
                QualityTag::Auto => self.auto_wanted,
            })
            .collect()
    }
}

/// Proxied direct-file candidate for versions whose embedded player
/// yields no manifest. The host serves the same episode as an MP4
/// download alongside the player.
fn mp4_fallback(
    mediaflow: &MediaFlowClient,
    stream: &StreamData,
    title: &str,
    source_tag: &str,
) -> Vec<StreamCandidate> {
    let Some(mp4) = stream.mp4_url.as_deref() else {
        return Vec::new();
    };
    debug!("falling back to the direct MP4 file");
    vec![StreamCandidate {
        title: format!("{} (MP4)", title),
        url: mediaflow.direct_url(mp4),
        referer: stream.episode_page.clone(),
        request_headers: playback_headers(&stream.episode_page),
        quality: QualityTag::Auto,
        source_tag: source_tag.to_string(),
    }]
}

static PARENTHETICAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").unwrap());

/// Lowercased, whitespace-collapsed title with parentheticals removed,
/// so `Naruto (ITA)` and `naruto` compare equal.
fn base_title(raw: &str) -> String {
    PARENTHETICAL_RE
        .replace_all(raw, "")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A hit is related when any of its titles shares the query's base
/// title. Sequels carry extra words ("Title 2") and fall out here.
fn matches_query(result: &SearchResult, query_base: &str) -> bool {
    [
        Some(result.name.as_str()),
        result.name_it.as_deref(),
        result.name_eng.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|t| base_title(t) == query_base)
}

fn episode_out_of_range(episode_count: Option<u32>, episode: Option<u32>) -> bool {
    matches!((episode_count, episode), (Some(count), Some(ep)) if ep > count)
}

fn select_episode<'a>(
    episodes: &'a [EpisodeEntry],
    episode: Option<u32>,
    is_movie: bool,
) -> Option<&'a EpisodeEntry> {
    let valid: Vec<&EpisodeEntry> = episodes.iter().filter(|e| !e.number.is_empty()).collect();
    if valid.is_empty() {
        return None;
    }
    if is_movie {
        return valid.first().copied();
    }
    match episode {
        Some(n) => valid
            .iter()
            .find(|e| e.number == n.to_string())
            .copied(),
        None => valid.first().copied(),
    }
}

/// `One Piece (ITA)` with a dub tag becomes `One piece ▪ ITA ▪ S1E5`.
fn candidate_title(
    display_name: &str,
    language: &LanguageTag,
    season: u32,
    episode: Option<u32>,
) -> String {
    let cleaned = clean_display_name(display_name);
    let mut title = format!("{} ▪ {} ▪ S{}", capitalize(&cleaned), language.label(), season);
    if let Some(ep) = episode {
        title.push_str(&format!("E{}", ep));
    }
    title
}

fn clean_display_name(name: &str) -> String {
    let mut cleaned = name.to_string();
    for marker in ["(ITA)", "(ita)", "(CR)", "(cr)"] {
        cleaned = cleaned.replace(marker, "");
    }
    // Bare markers outside parentheses too.
    let cleaned = cleaned
        .split_whitespace()
        .filter(|w| !w.eq_ignore_ascii_case("ita") && !w.eq_ignore_ascii_case("cr"))
        .collect::<Vec<_>>()
        .join(" ");
    cleaned.trim().to_string()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn playback_headers(referer: &str) -> HashMap<String, String> {
    HashMap::from([
        ("Referer".to_string(), referer.to_string()),
        ("User-Agent".to_string(), USER_AGENT.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, number: &str) -> EpisodeEntry {
        EpisodeEntry {
            id,
            number: number.to_string(),
            name: None,
        }
    }

    #[test]
    fn test_select_episode_exact_match() {
        let eps = vec![entry(1, "1"), entry(2, "2"), entry(3, "3")];
        assert_eq!(select_episode(&eps, Some(2), false).unwrap().id, 2);
    }

    #[test]
    fn test_select_episode_movie_takes_first() {
        let eps = vec![entry(10, "1"), entry(11, "2")];
        assert_eq!(select_episode(&eps, Some(2), true).unwrap().id, 10);
    }

    #[test]
    fn test_select_episode_no_match() {
        let eps = vec![entry(1, "1")];
        assert!(select_episode(&eps, Some(9), false).is_none());
    }

    #[test]
    fn test_select_episode_unspecified_takes_first() {
        let eps = vec![entry(5, "1"), entry(6, "2")];
        assert_eq!(select_episode(&eps, None, false).unwrap().id, 5);
    }

    #[test]
    fn test_candidate_title_format() {
        let title = candidate_title("one piece (ITA)", &LanguageTag::Dub, 1, Some(5));
        assert_eq!(title, "One piece ▪ ITA ▪ S1E5");
    }

    #[test]
    fn test_candidate_title_without_episode() {
        let title = candidate_title("Akira", &LanguageTag::Sub, 1, None);
        assert_eq!(title, "Akira ▪ SUB ▪ S1");
    }

    #[test]
    fn test_clean_display_name_strips_markers() {
        assert_eq!(clean_display_name("Naruto (ITA)"), "Naruto");
        assert_eq!(clean_display_name("Naruto ITA"), "Naruto");
        assert_eq!(clean_display_name("Frieren (CR)"), "Frieren");
        assert_eq!(clean_display_name("Bleach"), "Bleach");
    }

    #[test]
    fn test_dedup_first_occurrence_wins_and_is_idempotent() {
        let pipeline_filter = |candidates: Vec<StreamCandidate>| {
            let mut seen = HashSet::new();
            candidates
                .into_iter()
                .filter(|c| seen.insert(c.url.clone()))
                .collect::<Vec<_>>()
        };
        let mk = |url: &str, tag: &str| StreamCandidate {
            title: "t".to_string(),
            url: url.to_string(),
            referer: String::new(),
            request_headers: HashMap::new(),
            quality: QualityTag::Auto,
            source_tag: tag.to_string(),
        };
        let input = vec![
            mk("https://a/x.m3u8", "first"),
            mk("https://b/y.m3u8", "second"),
            mk("https://a/x.m3u8", "third"),
        ];
        let once = pipeline_filter(input);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].source_tag, "first");
        let twice = pipeline_filter(once.clone());
        assert_eq!(once, twice);
    }

    fn hit(name: &str, name_eng: Option<&str>) -> SearchResult {
        SearchResult {
            id: 1,
            slug: "slug".to_string(),
            name: name.to_string(),
            name_it: None,
            name_eng: name_eng.map(str::to_string),
            episodes_count: None,
        }
    }

    #[test]
    fn test_search_filter_excludes_sequels() {
        let query_base = base_title("Naruto");
        assert!(matches_query(&hit("Naruto", None), &query_base));
        assert!(matches_query(&hit("Naruto (ITA)", None), &query_base));
        assert!(matches_query(&hit("NARUTO  (CR)", None), &query_base));
        assert!(!matches_query(&hit("Naruto Shippuden", None), &query_base));
        assert!(!matches_query(&hit("Boruto: Naruto Next Generations", None), &query_base));
    }

    #[test]
    fn test_search_filter_matches_any_title_field() {
        let query_base = base_title("Attack on Titan");
        assert!(matches_query(
            &hit("L'attacco dei Giganti", Some("Attack on Titan")),
            &query_base
        ));
    }

    #[test]
    fn test_episode_out_of_range() {
        assert!(episode_out_of_range(Some(12), Some(13)));
        assert!(!episode_out_of_range(Some(12), Some(12)));
        assert!(!episode_out_of_range(None, Some(13)));
        assert!(!episode_out_of_range(Some(12), None));
    }

    #[test]
    fn test_mp4_fallback_goes_through_the_proxy() {
        let mediaflow =
            MediaFlowClient::new("https://mfp.example.org".to_string(), "pw".to_string());
        let stream = StreamData {
            episode_page: "https://host.example.org/anime/1/ep-1".to_string(),
            embed_url: None,
            mp4_url: Some("https://cdn.example.org/ep1.mp4".to_string()),
        };
        let candidates = mp4_fallback(&mediaflow, &stream, "Naruto ▪ SUB ▪ S1E1", "slug");
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].url.starts_with("https://mfp.example.org/proxy/stream?"));
        assert_eq!(candidates[0].title, "Naruto ▪ SUB ▪ S1E1 (MP4)");
        assert_eq!(candidates[0].quality, QualityTag::Auto);

        let without = StreamData {
            mp4_url: None,
            ..stream
        };
        assert!(mp4_fallback(&mediaflow, &without, "t", "slug").is_empty());
    }

    #[test]
    fn test_rendition_resolves_against_proxied_master() {
        // The master is probed through the proxy, so relative rendition
        // references must land on the proxy host, not the upstream CDN.
        let body = "#EXTM3U\n\
                    #EXT-X-STREAM-INF:RESOLUTION=1920x1080,BANDWIDTH=5000000\n\
                    playlist/1080.m3u8\n";
        let master = "https://mfp.example.org/proxy/hls/manifest.m3u8?d=https%3A%2F%2Fcdn.example.org%2Fm.m3u8&api_password=p";
        let best = manifest::select_best(manifest::parse_variants(body, master)).unwrap();
        assert!(best.url.starts_with("https://mfp.example.org/"));
    }

    #[test]
    fn test_finalize_defaults_to_auto_only() {
        let pipeline = Pipeline::new(&AppConfig::default());
        let mk = |url: &str, quality: QualityTag| StreamCandidate {
            title: "t".to_string(),
            url: url.to_string(),
            referer: String::new(),
            request_headers: HashMap::new(),
            quality,
            source_tag: "s".to_string(),
        };
        let merged = vec![
            mk("https://a/auto.m3u8", QualityTag::Auto),
            mk("https://a/1080.m3u8", QualityTag::High),
        ];
        let kept = pipeline.finalize(merged);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].quality, QualityTag::Auto);
    }
}
