use serde::Serialize;
use std::collections::HashMap;

/// External identifier namespace a request can arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdNamespace {
    Imdb,
    Tmdb,
    Kitsu,
    Mal,
}

impl std::fmt::Display for IdNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdNamespace::Imdb => write!(f, "imdb"),
            IdNamespace::Tmdb => write!(f, "tmdb"),
            IdNamespace::Kitsu => write!(f, "kitsu"),
            IdNamespace::Mal => write!(f, "mal"),
        }
    }
}

/// A parsed content identifier. Movies carry no episode.
///
/// Wire formats accepted:
/// - `kitsu:ID` / `kitsu:ID:EP`
/// - `mal:ID` / `mal:ID:EP` / `mal:ID:SEASON:EP`
/// - `ttNNNNN` / `ttNNNNN:SEASON:EP` (legacy imdb)
/// - `tmdb:ID` / `tmdb:ID:SEASON:EP`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdentifier {
    pub namespace: IdNamespace,
    pub id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl ContentIdentifier {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        match parts.as_slice() {
            ["kitsu", id] => Some(Self::new(IdNamespace::Kitsu, id, None, None)),
            ["kitsu", id, ep] => Some(Self::new(IdNamespace::Kitsu, id, None, ep.parse().ok())),
            ["mal", id] => Some(Self::new(IdNamespace::Mal, id, None, None)),
            ["mal", id, ep] => Some(Self::new(IdNamespace::Mal, id, None, ep.parse().ok())),
            ["mal", id, s, ep] => {
                Some(Self::new(IdNamespace::Mal, id, s.parse().ok(), ep.parse().ok()))
            }
            ["tmdb", id] => Some(Self::new(IdNamespace::Tmdb, id, None, None)),
            ["tmdb", id, s, ep] => {
                Some(Self::new(IdNamespace::Tmdb, id, s.parse().ok(), ep.parse().ok()))
            }
            [id] if id.starts_with("tt") => Some(Self::new(IdNamespace::Imdb, id, None, None)),
            [id, s, ep] if id.starts_with("tt") => {
                Some(Self::new(IdNamespace::Imdb, id, s.parse().ok(), ep.parse().ok()))
            }
            _ => None,
        }
    }

    fn new(namespace: IdNamespace, id: &str, season: Option<u32>, episode: Option<u32>) -> Self {
        Self {
            namespace,
            id: id.to_string(),
            season,
            episode,
        }
    }

    /// Movies are identifiers without an episode component.
    pub fn is_movie(&self) -> bool {
        self.episode.is_none()
    }

    /// Cache key for the resolver. Seasons disambiguate imdb/tmdb lookups
    /// (different seasons can map to different kitsu/mal entries).
    pub fn cache_key(&self) -> String {
        match self.namespace {
            IdNamespace::Imdb | IdNamespace::Tmdb => {
                format!("{}:{}:S{}", self.namespace, self.id, self.season.unwrap_or(1))
            }
            _ => format!("{}:{}", self.namespace, self.id),
        }
    }
}

/// How the provider numbers the episodes of a mapped title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpisodeMode {
    Absolute,
    Seasonal,
    Mixed,
    #[default]
    Unknown,
}

impl EpisodeMode {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "absolute" => EpisodeMode::Absolute,
            "seasonal" => EpisodeMode::Seasonal,
            "mixed" => EpisodeMode::Mixed,
            _ => EpisodeMode::Unknown,
        }
    }
}

/// Canonical metadata produced by the resolution cascade.
/// Immutable once created; cached per (identifier, season).
#[derive(Debug, Clone, Default)]
pub struct ResolvedMetadata {
    pub canonical_title: String,
    pub mal_id: Option<String>,
    pub kitsu_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    /// Alternate titles to try against the provider search, in order.
    pub title_hints: Vec<String>,
    pub episode_mode: EpisodeMode,
    pub mapped_seasons: Vec<u32>,
    /// Computed when episode_mode is Absolute and season > 1.
    pub absolute_episode: Option<u32>,
    /// Native provider start date, used downstream for year filtering.
    pub start_date: Option<String>,
}

/// One provider-side match candidate (e.g. a subtitled or dubbed listing).
#[derive(Debug, Clone)]
pub struct SourceVersion {
    pub provider_id: i64,
    pub slug: String,
    pub display_name: String,
    pub language_tag: LanguageTag,
    pub episode_count: Option<u32>,
}

/// Language/variant classification derived from the provider-side name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageTag {
    Sub,
    Dub,
    DubCrunchy,
}

impl LanguageTag {
    /// Classify by the markers the provider embeds in its listing names.
    pub fn from_display_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("cr") {
            LanguageTag::DubCrunchy
        } else if lower.contains("ita") {
            LanguageTag::Dub
        } else {
            LanguageTag::Sub
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LanguageTag::Sub => "SUB",
            LanguageTag::Dub | LanguageTag::DubCrunchy => "ITA",
        }
    }
}

/// Quality classification of a candidate: the master playlist ("auto") or a
/// synthesized explicit high-resolution rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTag {
    Auto,
    High,
}

/// A manifest rendition entry: sub-playlist address plus quality attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestVariant {
    pub url: String,
    pub height: u32,
    pub bandwidth: Option<u64>,
}

/// The final playable unit returned to the caller. Carries everything needed
/// for playback: address, referer and the request headers the host expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamCandidate {
    pub title: String,
    pub url: String,
    pub referer: String,
    pub request_headers: HashMap<String, String>,
    pub quality: QualityTag,
    pub source_tag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tmdb_series() {
        let id = ContentIdentifier::parse("tmdb:555:3:5").unwrap();
        assert_eq!(id.namespace, IdNamespace::Tmdb);
        assert_eq!(id.id, "555");
        assert_eq!(id.season, Some(3));
        assert_eq!(id.episode, Some(5));
        assert!(!id.is_movie());
    }

    #[test]
    fn test_parse_tmdb_movie() {
        let id = ContentIdentifier::parse("tmdb:603").unwrap();
        assert!(id.is_movie());
        assert_eq!(id.season, None);
    }

    #[test]
    fn test_parse_legacy_imdb() {
        let id = ContentIdentifier::parse("tt0388629:10:10").unwrap();
        assert_eq!(id.namespace, IdNamespace::Imdb);
        assert_eq!(id.id, "tt0388629");
        assert_eq!(id.season, Some(10));
        assert_eq!(id.episode, Some(10));
    }

    #[test]
    fn test_parse_kitsu_with_episode() {
        let id = ContentIdentifier::parse("kitsu:1376:24").unwrap();
        assert_eq!(id.namespace, IdNamespace::Kitsu);
        assert_eq!(id.episode, Some(24));
        assert_eq!(id.season, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ContentIdentifier::parse("").is_none());
        assert!(ContentIdentifier::parse("anidb:123").is_none());
        assert!(ContentIdentifier::parse("12345").is_none());
    }

    #[test]
    fn test_cache_key_includes_season_for_imdb_tmdb() {
        let a = ContentIdentifier::parse("tmdb:555:3:5").unwrap();
        let b = ContentIdentifier::parse("tmdb:555:2:5").unwrap();
        assert_ne!(a.cache_key(), b.cache_key());

        // Movies default to season 1
        let movie = ContentIdentifier::parse("tmdb:555").unwrap();
        assert_eq!(movie.cache_key(), "tmdb:555:S1");

        // Kitsu keys ignore the episode
        let k1 = ContentIdentifier::parse("kitsu:1376:24").unwrap();
        let k2 = ContentIdentifier::parse("kitsu:1376:25").unwrap();
        assert_eq!(k1.cache_key(), k2.cache_key());
    }

    #[test]
    fn test_language_tag_from_name() {
        assert_eq!(
            LanguageTag::from_display_name("Jujutsu Kaisen"),
            LanguageTag::Sub
        );
        assert_eq!(
            LanguageTag::from_display_name("Jujutsu Kaisen (ITA)"),
            LanguageTag::Dub
        );
        assert_eq!(
            LanguageTag::from_display_name("Jujutsu Kaisen (CR)"),
            LanguageTag::DubCrunchy
        );
    }
}
