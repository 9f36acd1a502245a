// Configuration module for anipipe
// Handles XDG-compliant config file lookup and environment overrides

use serde::Deserialize;
use std::path::PathBuf;

const APP_NAME: &str = "anipipe";
const CONFIG_FILENAME: &str = "config.toml";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Metadata provider configuration
    pub metadata: MetadataConfig,

    /// Forwarding/proxy service configuration
    pub proxy: ProxyConfig,

    /// Companion scraper script configuration
    pub scraper: ScraperConfig,

    /// Stream quality selection
    pub quality: QualityConfig,

    /// Metadata cache tuning
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// TMDB API key (optional; without it the tmdb fallback steps are skipped)
    pub tmdb_api_key: Option<String>,
}

/// MediaFlow-compatible forwarding proxy. When absent, decoded host
/// addresses produce no candidates (unproxied delivery is not offered).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub mfp_url: Option<String>,
    pub mfp_password: Option<String>,
}

impl ProxyConfig {
    pub fn is_configured(&self) -> bool {
        self.mfp_url.is_some() && self.mfp_password.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Path to the companion scraper script
    pub script_path: Option<PathBuf>,

    /// Hard wall-clock timeout for one scraper invocation, in milliseconds.
    /// The process is killed when it expires.
    pub timeout_ms: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            script_path: None,
            timeout_ms: 120_000,
        }
    }
}

/// Which quality classes to return. With neither flag set, auto (master
/// playlist) candidates are returned; high candidates require opting in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub auto: bool,
    pub high: bool,
}

impl QualityConfig {
    pub fn auto_wanted(&self) -> bool {
        self.auto || !self.high
    }

    pub fn high_wanted(&self) -> bool {
        self.high
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Metadata entry time-to-live in seconds (default: 6 hours)
    pub ttl_seconds: u64,

    /// Maximum number of cached metadata entries
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 6 * 60 * 60,
            capacity: 5000,
        }
    }
}

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub tmdb_api_key: Option<String>,
    pub proxy: ProxyConfig,
    pub scraper: ScraperConfig,
    pub quality: QualityConfig,
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Load configuration from TOML file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML config file
    /// 3. Default values
    pub fn load() -> Self {
        let config_dir = Self::find_config_dir();
        let config_file = Self::load_config_file(&config_dir);
        Self::build(config_file)
    }

    /// Find the config directory (for locating config.toml)
    fn find_config_dir() -> PathBuf {
        if let Ok(path) = std::env::var("ANIPIPE_CONFIG_DIR") {
            return PathBuf::from(path);
        }

        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }

        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Load and parse the TOML config file
    fn load_config_file(config_dir: &std::path::Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from config file with environment overrides
    fn build(config_file: ConfigFile) -> Self {
        let tmdb_api_key = std::env::var("TMDB_API_KEY")
            .ok()
            .or(config_file.metadata.tmdb_api_key);

        let proxy = ProxyConfig {
            mfp_url: std::env::var("MFP_URL").ok().or(config_file.proxy.mfp_url),
            mfp_password: std::env::var("MFP_PASSWORD")
                .ok()
                .or(config_file.proxy.mfp_password),
        };

        let scraper = ScraperConfig {
            script_path: std::env::var("ANIPIPE_SCRAPER_PATH")
                .ok()
                .map(PathBuf::from)
                .or(config_file.scraper.script_path),
            timeout_ms: std::env::var("ANIPIPE_SCRAPER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(config_file.scraper.timeout_ms),
        };

        Self {
            tmdb_api_key,
            proxy,
            scraper,
            quality: config_file.quality,
            cache: config_file.cache,
        }
    }

    /// Log the effective configuration at startup (secrets elided)
    pub fn log_config(&self) {
        if self.tmdb_api_key.is_some() {
            tracing::info!("TMDB lookups: ENABLED");
        } else {
            tracing::info!("TMDB lookups: disabled");
            tracing::info!("Hint: Add tmdb_api_key to config.toml or set TMDB_API_KEY env var");
        }

        if self.proxy.is_configured() {
            tracing::info!("Stream proxy: ENABLED");
        } else {
            tracing::warn!("Stream proxy: not configured - no candidates will be produced");
        }

        match &self.scraper.script_path {
            Some(path) => tracing::info!(
                "Scraper script: {} (timeout {}ms)",
                path.display(),
                self.scraper.timeout_ms
            ),
            None => tracing::warn!("Scraper script: not configured"),
        }

        tracing::debug!(
            "Metadata cache: ttl {}s, capacity {}",
            self.cache.ttl_seconds,
            self.cache.capacity
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_defaults_to_auto() {
        let q = QualityConfig::default();
        assert!(q.auto_wanted());
        assert!(!q.high_wanted());
    }

    #[test]
    fn test_quality_high_only_disables_auto() {
        let q = QualityConfig {
            auto: false,
            high: true,
        };
        assert!(!q.auto_wanted());
        assert!(q.high_wanted());
    }

    #[test]
    fn test_quality_both() {
        let q = QualityConfig {
            auto: true,
            high: true,
        };
        assert!(q.auto_wanted());
        assert!(q.high_wanted());
    }

    #[test]
    fn test_config_file_parses_partial_toml() {
        let parsed: ConfigFile = toml::from_str(
            r#"
            [proxy]
            mfp_url = "https://mfp.example.org"
            mfp_password = "secret"

            [cache]
            ttl_seconds = 60
            "#,
        )
        .unwrap();
        assert!(parsed.proxy.is_configured());
        assert_eq!(parsed.cache.ttl_seconds, 60);
        assert_eq!(parsed.cache.capacity, 5000);
        assert_eq!(parsed.scraper.timeout_ms, 120_000);
    }
}
