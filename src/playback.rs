#![forbid(unsafe_code)]

//! Best-effort derivation of direct MP4 URLs from clip thumbnail URLs.
//!
//! The CDN layout is undocumented and has changed several times, so each known
//! shape is a named pattern, tried in order. Callers only ever see
//! [`PlaybackResolver`].

use std::sync::LazyLock;

use regex::Regex;

pub trait PlaybackResolver: Send + Sync {
    /// Returns a playable URL for `source`, or `None` when no rule applies.
    fn derive_url(&self, source: &str) -> Option<String>;
}

struct UrlPattern {
    name: &'static str,
    regex: Regex,
    replacement: &'static str,
}

static KNOWN_PATTERNS: LazyLock<Vec<UrlPattern>> = LazyLock::new(|| {
    [
        // <...>-social-preview.jpg on any of the clip hosts
        (
            "social-preview",
            r"^(https://[^\s?#]+?)-social-preview\.(?:jpg|jpeg|png)$",
            "$1.mp4",
        ),
        // clips-media-assets2.twitch.tv/AT-cm%7C123-preview-480x272.jpg
        (
            "media-assets-preview",
            r"^(https://clips-media-assets2?\.twitch\.tv/.+?)-preview(?:-\d+x\d+)?\.(?:jpg|jpeg|png)$",
            "$1.mp4",
        ),
        // static-cdn.jtvnw.net/twitch-clips/<slug>/<id>-preview-480x272.jpg
        (
            "static-cdn-preview",
            r"^(https://static-cdn\.jtvnw\.net/twitch-clips/.+?)-preview(?:-\d+x\d+)?\.(?:jpg|jpeg|png)$",
            "$1.mp4",
        ),
        // d2nvs31859zcd8.cloudfront.net/<...>-preview-480x272.jpg
        (
            "cloudfront-preview",
            r"^(https://[a-z0-9]+\.cloudfront\.net/.+?)-preview(?:-\d+x\d+)?\.(?:jpg|jpeg|png)$",
            "$1.mp4",
        ),
    ]
    .into_iter()
    .map(|(name, pattern, replacement)| UrlPattern {
        name,
        regex: Regex::new(pattern).unwrap(),
        replacement,
    })
    .collect()
});

/// Resolver backed by the known thumbnail URL shapes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailPatterns;

impl PlaybackResolver for ThumbnailPatterns {
    fn derive_url(&self, source: &str) -> Option<String> {
        let source = source.trim();
        for pattern in KNOWN_PATTERNS.iter() {
            if pattern.regex.is_match(source) {
                let derived = pattern
                    .regex
                    .replace(source, pattern.replacement)
                    .into_owned();
                tracing::trace!(pattern = pattern.name, %derived, "derived playback url");
                return Some(derived);
            }
        }
        tracing::debug!(source, "no playback url pattern matched");
        None
    }
}
