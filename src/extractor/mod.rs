// Host page fetching and media address recovery.
//
// Hosts hide the real manifest address behind obfuscated client-side
// scripts. Each known obfuscation scheme is one decoder; the payload is
// run through them in order until one produces an address.

pub mod fragments;
pub mod manifest;
pub mod substitution;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use fragments::FragmentDecoder;
use substitution::SubstitutionDecoder;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

static PLAIN_MANIFEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']*index\.m3u8\?token=[^"']+)["']"#).unwrap());

/// One obfuscation scheme reverse-engineered from a host's player.
pub trait StreamDecoder: Send + Sync {
    fn name(&self) -> &'static str;
    fn try_decode(&self, payload: &str) -> Option<String>;
}

/// Recover a media address from a host page or script payload.
///
/// Fast path first: some pages carry the tokenized manifest address as a
/// plain string literal and need no decoding at all.
pub fn decode_stream_url(payload: &str) -> Option<String> {
    if let Some(caps) = PLAIN_MANIFEST_RE.captures(payload) {
        debug!("plain manifest address found, no decoding needed");
        return Some(caps[1].to_string());
    }

    let decoders: [&dyn StreamDecoder; 2] = [&SubstitutionDecoder, &FragmentDecoder];
    for decoder in decoders {
        if let Some(url) = decoder.try_decode(payload) {
            debug!("decoder '{}' recovered media address", decoder.name());
            return Some(url);
        }
    }
    warn!("no decoder matched the payload");
    None
}

/// Fetches host embed pages with the referer and browser identity the
/// hosts require.
pub struct HostPageClient {
    client: Client,
}

impl Default for HostPageClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPageClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn fetch(&self, url: &str, referer: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Referer", referer)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("Failed to fetch host page")?;

        if !response.status().is_success() {
            anyhow::bail!("host page returned status {}", response.status());
        }

        response.text().await.context("Failed to read host page body")
    }

    /// Fetch an HLS manifest. Used both for the master manifest and for
    /// probing candidate addresses.
    pub async fn fetch_manifest(&self, url: &str, referer: &str) -> Result<String> {
        self.fetch(url, referer).await
    }
}
