#![forbid(unsafe_code)]

//! Clip records, request parameters, and the error taxonomy shared by every
//! way of acquiring a clip list.
//!
//! Query parameters arrive as raw strings so malformed values can fall back to
//! defaults instead of rejecting the request. Out-of-range numbers are clamped.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::parse_flag;

pub const MIN_CLIP_COUNT: usize = 1;
pub const MAX_CLIP_COUNT: usize = 20;
pub const DEFAULT_CLIP_COUNT: usize = 10;

pub const MIN_INTERVAL_SECS: u64 = 10;
pub const MAX_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_INTERVAL_SECS: u64 = 45;

/// Slugs shown when the operator opts into fallback and the API is down.
const FALLBACK_SLUGS: [&str; 10] = [
    "AwkwardHelplessSalamanderSwiftRage",
    "TameIntelligentChimpanzeeHassaanChop",
    "PowerfulHandsomeNarwhalM4xHeh",
    "GloriousEagerDogePogChamp",
    "InventiveRealTapirCorgiDerp",
    "SmallCarefulSmoothieOMGScoots",
    "FunnyBraveChickpeaPogChamp",
    "ElegantLazyPigeonBibleThump",
    "WildObedientShrimpSSSsss",
    "CleverHealthyWormNotLikeThis",
];

/// One clip as returned by the clips endpoint. Unknown upstream fields are
/// ignored so the struct deserializes straight from the API payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub creator_name: String,
    #[serde(default)]
    pub view_count: u64,
    pub created_at: DateTime<Utc>,
    /// Seconds, fractional.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub embed_url: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("missing configuration: {}", .missing.join(", "))]
    Configuration { missing: Vec<&'static str> },
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("{0}")]
    Empty(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Upstream(_) => "upstream",
            Self::Empty(_) => "empty",
        }
    }
}

/// Trailing window the clips must have been created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" | "24h" => Some(Self::Day),
            "week" | "7d" => Some(Self::Week),
            "month" | "30d" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    pub fn days(self) -> i64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
        }
    }

    /// `(started_at, ended_at)` for a window ending at `now`.
    pub fn window(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::days(self.days()), now)
    }
}

/// Query string as received. Every field stays a string so that garbage like
/// `count=lots` degrades to the default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawClipQuery {
    pub count: Option<String>,
    pub period: Option<String>,
    pub autoplay: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipQuery {
    pub count: usize,
    pub period: Period,
    pub autoplay: bool,
    pub interval_secs: u64,
}

impl Default for ClipQuery {
    fn default() -> Self {
        Self {
            count: DEFAULT_CLIP_COUNT,
            period: Period::Week,
            autoplay: true,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl ClipQuery {
    pub fn from_raw(raw: &RawClipQuery) -> Self {
        let defaults = Self::default();
        Self {
            count: parse_clamped(
                raw.count.as_deref(),
                MIN_CLIP_COUNT as i64,
                MAX_CLIP_COUNT as i64,
            )
            .map_or(defaults.count, |value| value as usize),
            period: raw
                .period
                .as_deref()
                .and_then(Period::parse)
                .unwrap_or(defaults.period),
            autoplay: raw
                .autoplay
                .as_deref()
                .and_then(parse_flag)
                .unwrap_or(defaults.autoplay),
            interval_secs: parse_clamped(
                raw.interval.as_deref(),
                MIN_INTERVAL_SECS as i64,
                MAX_INTERVAL_SECS as i64,
            )
            .map_or(defaults.interval_secs, |value| value as u64),
        }
    }
}

fn parse_clamped(value: Option<&str>, min: i64, max: i64) -> Option<i64> {
    value?
        .trim()
        .parse::<i64>()
        .ok()
        .map(|value| value.clamp(min, max))
}

/// Orders by views, newest first on ties, then by id so identical input always
/// yields identical output. Keeps at most `count` clips.
pub fn select_top(mut clips: Vec<Clip>, count: usize) -> Vec<Clip> {
    clips.sort_by(|a, b| {
        b.view_count
            .cmp(&a.view_count)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    clips.truncate(count);
    clips
}

/// Embed-only placeholders: no thumbnails, so they cannot be played natively.
pub fn fallback_clips(broadcaster: &str, count: usize) -> Vec<Clip> {
    FALLBACK_SLUGS
        .iter()
        .take(count)
        .enumerate()
        .map(|(index, slug)| Clip {
            id: (*slug).to_string(),
            title: format!("{broadcaster} clip {}", index + 1),
            creator_name: String::new(),
            view_count: 0,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            duration: 0.0,
            thumbnail_url: String::new(),
            url: String::new(),
            embed_url: String::new(),
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn sample_clip(id: &str, views: u64) -> Clip {
    Clip {
        id: id.to_string(),
        title: format!("Clip {id}"),
        creator_name: "someone".to_string(),
        view_count: views,
        created_at: "2024-05-01T12:00:00Z".parse().unwrap(),
        duration: 28.5,
        thumbnail_url: format!(
            "https://clips-media-assets2.twitch.tv/AT-cm%7C{id}-preview-480x272.jpg"
        ),
        url: format!("https://clips.twitch.tv/{id}"),
        embed_url: format!("https://clips.twitch.tv/embed?clip={id}"),
    }
}
