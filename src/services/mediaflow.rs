// MediaFlow proxy delivery adapter.
//
// Streams are handed to clients through a MediaFlow proxy instance. The
// proxy's extractor endpoint is queried in introspection mode
// (redirect_stream=false) so the final playable URL can be assembled
// locally instead of following redirects at play time.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct MediaFlowClient {
    client: Client,
    base_url: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    mediaflow_proxy_url: Option<String>,
    #[serde(default)]
    query_params: HashMap<String, serde_json::Value>,
    destination_url: Option<String>,
    #[serde(default)]
    request_headers: HashMap<String, serde_json::Value>,
}

impl MediaFlowClient {
    pub fn new(base_url: String, password: String) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url,
            password,
        }
    }

    /// Build the redirecting proxy URL for a host stream. Always valid as
    /// a fallback even when introspection fails.
    pub fn redirect_url(&self, host: &str, stream_url: &str) -> String {
        format!(
            "{}/extractor/video?host={}&redirect_stream=true&api_password={}&d={}",
            self.base_url,
            host,
            self.password,
            urlencoding::encode(stream_url)
        )
    }

    /// Build the generic stream-proxy URL for a direct media file
    /// (the host's MP4 download address).
    pub fn direct_url(&self, stream_url: &str) -> String {
        format!(
            "{}/proxy/stream?d={}&api_password={}",
            self.base_url,
            urlencoding::encode(stream_url),
            self.password
        )
    }

    /// Resolve the final playable URL through proxy introspection.
    /// Falls back to the plain redirecting URL when the proxy is
    /// unreachable or replies without a `mediaflow_proxy_url`.
    pub async fn playable_url(&self, host: &str, stream_url: &str) -> String {
        let fallback = self.redirect_url(host, stream_url);
        match self.introspect(host, stream_url).await {
            Ok(Some(assembled)) => assembled,
            Ok(None) => {
                warn!("proxy introspection had no mediaflow_proxy_url, using redirect URL");
                fallback
            }
            Err(e) => {
                warn!("proxy introspection failed: {:#}", e);
                fallback
            }
        }
    }

    async fn introspect(&self, host: &str, stream_url: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/extractor/video?host={}&redirect_stream=false&api_password={}&d={}",
            self.base_url,
            host,
            self.password,
            urlencoding::encode(stream_url)
        );
        debug!("introspecting proxy stream for {}", host);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("MediaFlow introspection request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("MediaFlow returned status {}", response.status());
        }

        let data: IntrospectionResponse = response
            .json()
            .await
            .context("Failed to parse MediaFlow introspection response")?;

        Ok(assemble_final_url(&data))
    }
}

/// Join the introspection parts into one URL: proxy base, then its query
/// params, then the destination as `d`, then each request header as an
/// `h_` prefixed param.
fn assemble_final_url(data: &IntrospectionResponse) -> Option<String> {
    let mut final_url = data.mediaflow_proxy_url.clone()?;

    let mut pairs = Vec::new();
    for (key, value) in &data.query_params {
        if let Some(v) = json_scalar(value) {
            pairs.push(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&v)
            ));
        }
    }
    if !pairs.is_empty() {
        final_url.push(if final_url.contains('?') { '&' } else { '?' });
        final_url.push_str(&pairs.join("&"));
    }

    if let Some(dest) = &data.destination_url {
        final_url.push(if final_url.contains('?') { '&' } else { '?' });
        final_url.push_str("d=");
        final_url.push_str(&urlencoding::encode(dest));
    }

    for (key, value) in &data.request_headers {
        if let Some(v) = json_scalar(value) {
            final_url.push_str(&format!("&h_{}={}", key, urlencoding::encode(&v)));
        }
    }

    Some(final_url)
}

fn json_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Force `h=1` (full HD) inside the proxied destination URL. The `d`
/// query param carries the upstream URL; rewrite it in place and leave
/// the link untouched when anything fails to parse.
pub fn inject_fhd_flag(proxy_url: &str) -> String {
    let rewrite = || -> Option<String> {
        let mut outer = Url::parse(proxy_url).ok()?;
        let dest = outer
            .query_pairs()
            .find(|(k, _)| k == "d")
            .map(|(_, v)| v.into_owned())?;
        let mut dest_url = Url::parse(&dest).ok()?;

        let mut params: Vec<(String, String)> = dest_url
            .query_pairs()
            .filter(|(k, _)| k != "h")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.push(("h".to_string(), "1".to_string()));
        dest_url
            .query_pairs_mut()
            .clear()
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let others: Vec<(String, String)> = outer
            .query_pairs()
            .filter(|(k, _)| k != "d")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        outer
            .query_pairs_mut()
            .clear()
            .extend_pairs(others.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .append_pair("d", dest_url.as_str());

        Some(outer.to_string())
    };
    rewrite().unwrap_or_else(|| proxy_url.to_string())
}
