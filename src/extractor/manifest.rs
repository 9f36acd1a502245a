// HLS master manifest parsing and rendition selection.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::models::ManifestVariant;

static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)RESOLUTION=\d+x(\d+)").unwrap());
static BANDWIDTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)BANDWIDTH=(\d+)").unwrap());
static PLAYLIST_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/playlist/\d+").unwrap());

/// Minimum rendition height considered full HD.
pub const FHD_MIN_HEIGHT: u32 = 720;

pub fn is_master_manifest(body: &str) -> bool {
    body.to_ascii_uppercase().contains("#EXT-X-STREAM-INF")
}

/// Parse the variant renditions out of a master manifest.
///
/// Each `#EXT-X-STREAM-INF` directive is paired with the next
/// non-comment line as its URI; directives without one are skipped.
/// Relative URIs are resolved against the manifest's own address, and
/// bare `/playlist/{n}` segments get an explicit `.m3u8` suffix (the
/// host serves them either way but some players refuse the bare form).
pub fn parse_variants(body: &str, manifest_url: &str) -> Vec<ManifestVariant> {
    let lines: Vec<&str> = body.lines().collect();
    let mut variants = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.to_ascii_uppercase().starts_with("#EXT-X-STREAM-INF:") {
            continue;
        }
        let Some(uri) = lines.get(i + 1).map(|l| l.trim()) else {
            continue;
        };
        if uri.is_empty() || uri.starts_with('#') {
            continue;
        }

        let height = RESOLUTION_RE
            .captures(line)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0);
        let bandwidth = BANDWIDTH_RE.captures(line).and_then(|c| c[1].parse().ok());

        let url = append_manifest_suffix(&resolve_reference(uri, manifest_url));
        variants.push(ManifestVariant {
            url,
            height,
            bandwidth,
        });
    }

    variants
}

/// Best rendition: highest height, ties broken by bandwidth. Stable for
/// equal keys, so repeated parses of the same manifest pick the same
/// variant.
pub fn select_best(mut variants: Vec<ManifestVariant>) -> Option<ManifestVariant> {
    variants.sort_by(|a, b| {
        b.height
            .cmp(&a.height)
            .then(b.bandwidth.unwrap_or(0).cmp(&a.bandwidth.unwrap_or(0)))
    });
    variants.into_iter().next()
}

fn resolve_reference(uri: &str, manifest_url: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    match Url::parse(manifest_url).and_then(|base| base.join(uri)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => uri.to_string(),
    }
}

/// `/playlist/123` -> `/playlist/123.m3u8`, leaving already-suffixed
/// paths and longer segments alone.
fn append_manifest_suffix(url: &str) -> String {
    let Some(m) = PLAYLIST_SEGMENT_RE.find(url) else {
        return url.to_string();
    };
    let after = &url[m.end()..];
    let followed_by_word = after
        .chars()
        .next()
        .map(|c| c.is_alphanumeric() || c == '_' || c == '.')
        .unwrap_or(false);
    if after.starts_with(".m3u8") || followed_by_word {
        return url.to_string();
    }
    format!("{}{}{}", &url[..m.end()], ".m3u8", after)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=842x480\n\
        480.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720\n\
        720.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080\n\
        1080.m3u8\n";

    #[test]
    fn test_parse_and_select_highest() {
        let variants = parse_variants(MASTER, "https://cdn.example.org/hls/master.m3u8");
        assert_eq!(variants.len(), 3);
        let best = select_best(variants).unwrap();
        assert_eq!(best.height, 1080);
        assert_eq!(best.url, "https://cdn.example.org/hls/1080.m3u8");
    }

    #[test]
    fn test_bandwidth_breaks_height_ties() {
        let body = "#EXT-X-STREAM-INF:BANDWIDTH=1000,RESOLUTION=1280x720\n\
            low.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=9000,RESOLUTION=1280x720\n\
            high.m3u8\n";
        let best =
            select_best(parse_variants(body, "https://cdn.example.org/m.m3u8")).unwrap();
        assert!(best.url.ends_with("/high.m3u8"));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let first = select_best(parse_variants(MASTER, "https://x.example.org/a/m.m3u8"));
        let second = select_best(parse_variants(MASTER, "https://x.example.org/a/m.m3u8"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_selection_is_order_independent() {
        let variants = parse_variants(MASTER, "https://x.example.org/a/m.m3u8");
        let mut reversed = variants.clone();
        reversed.reverse();
        assert_eq!(select_best(variants), select_best(reversed));
    }

    #[test]
    fn test_directive_without_uri_is_skipped() {
        let body = "#EXT-X-STREAM-INF:BANDWIDTH=1000,RESOLUTION=640x360\n\
            #EXT-X-ENDLIST\n";
        assert!(parse_variants(body, "https://cdn.example.org/m.m3u8").is_empty());
    }

    #[test]
    fn test_missing_resolution_defaults_to_zero_height() {
        let body = "#EXT-X-STREAM-INF:BANDWIDTH=1000\naudio.m3u8\n";
        let variants = parse_variants(body, "https://cdn.example.org/m.m3u8");
        assert_eq!(variants[0].height, 0);
    }

    #[test]
    fn test_absolute_uri_kept_verbatim() {
        let body = "#EXT-X-STREAM-INF:RESOLUTION=1920x1080\n\
            https://other.example.org/v/1080.m3u8\n";
        let variants = parse_variants(body, "https://cdn.example.org/m.m3u8");
        assert_eq!(variants[0].url, "https://other.example.org/v/1080.m3u8");
    }

    #[test]
    fn test_playlist_segment_gets_suffix() {
        assert_eq!(
            append_manifest_suffix("https://h.example.org/playlist/123?t=1"),
            "https://h.example.org/playlist/123.m3u8?t=1"
        );
        assert_eq!(
            append_manifest_suffix("https://h.example.org/playlist/123"),
            "https://h.example.org/playlist/123.m3u8"
        );
        assert_eq!(
            append_manifest_suffix("https://h.example.org/playlist/123.m3u8"),
            "https://h.example.org/playlist/123.m3u8"
        );
        assert_eq!(
            append_manifest_suffix("https://h.example.org/playlist/123abc"),
            "https://h.example.org/playlist/123abc"
        );
    }
}
