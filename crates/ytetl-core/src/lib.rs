//! Core domain model and field normalization for the channel ETL.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "ytetl-core";

/// Scores strictly above this are positive; strictly below its negation are negative.
pub const SENTIMENT_THRESHOLD: f64 = 0.05;

static TIME_OF_DAY_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?").expect("duration pattern is valid")
});

/// Duration as the upstream API delivered it, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum RawDuration {
    Seconds(f64),
    Text(String),
    #[default]
    Missing,
}

impl RawDuration {
    pub fn from_json(value: Option<&serde_json::Value>) -> Self {
        match value {
            Some(serde_json::Value::Number(n)) => n.as_f64().map_or(Self::Missing, Self::Seconds),
            Some(serde_json::Value::String(s)) => Self::Text(s.clone()),
            _ => Self::Missing,
        }
    }
}

impl From<&str> for RawDuration {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for RawDuration {
    fn from(value: i64) -> Self {
        Self::Seconds(value as f64)
    }
}

/// Normalize a raw duration into whole seconds.
///
/// Numbers are truncated, compact `PT#H#M#S` strings are summed, and anything
/// else (missing, NaN, malformed, overflowing) becomes 0.
pub fn normalize_duration(raw: &RawDuration) -> i64 {
    match raw {
        RawDuration::Seconds(secs) if secs.is_finite() => (secs.trunc() as i64).max(0),
        RawDuration::Seconds(_) | RawDuration::Missing => 0,
        RawDuration::Text(text) => parse_compact_duration(text.trim()).unwrap_or(0),
    }
}

fn parse_compact_duration(text: &str) -> Option<i64> {
    if text.is_empty() {
        return None;
    }
    let caps = TIME_OF_DAY_DURATION.captures(text)?;
    let part = |idx: usize| -> Option<i64> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse::<i64>().ok(),
            None => Some(0),
        }
    };
    let hours = part(1)?;
    let minutes = part(2)?;
    let seconds = part(3)?;
    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

/// Format hours/minutes/seconds in the compact form the API uses.
pub fn format_duration(hours: u32, minutes: u32, seconds: u32) -> String {
    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if seconds > 0 || (hours == 0 && minutes == 0) {
        out.push_str(&format!("{seconds}S"));
    }
    out
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Counters arrive as decimal strings and are omitted when hidden.
pub fn parse_count(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(0)
        .max(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score > SENTIMENT_THRESHOLD {
            Self::Positive
        } else if score < -SENTIMENT_THRESHOLD {
            Self::Negative
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" => Ok(Self::Negative),
            other => Err(format!("unknown sentiment label {other:?}")),
        }
    }
}

/// Rows identified by a globally unique external id.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Channel statistics as extracted, pre-transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDraft {
    pub channel_id: String,
    pub channel_name: String,
    pub view_count: i64,
    pub video_count: i64,
    pub subscriber_count: i64,
}

impl ChannelDraft {
    /// Channels publish their uploads to a playlist whose id swaps the `UC` prefix for `UU`.
    pub fn uploads_playlist_id(&self) -> Option<String> {
        let rest = self.channel_id.get(2..)?;
        if rest.is_empty() {
            return None;
        }
        Some(format!("UU{rest}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDraft {
    pub video_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub title: String,
    pub published_at: Option<String>,
    pub duration: RawDuration,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentDraft {
    pub comment_id: String,
    pub video_id: String,
    pub channel_id: String,
    /// `None` when the payload carried no string body.
    pub text: Option<String>,
    pub published_at: Option<String>,
}

impl CommentDraft {
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Persisted channel row; overwritten on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub channel_name: String,
    pub view_count: i64,
    pub video_count: i64,
    pub subscriber_count: i64,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn from_draft(draft: ChannelDraft, updated_at: DateTime<Utc>) -> Self {
        Self {
            channel_id: draft.channel_id,
            channel_name: draft.channel_name,
            view_count: draft.view_count.max(0),
            video_count: draft.video_count.max(0),
            subscriber_count: draft.subscriber_count.max(0),
            updated_at,
        }
    }
}

/// Persisted video row; append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub video_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
}

impl Video {
    pub fn from_draft(draft: VideoDraft) -> Self {
        Self {
            duration_seconds: normalize_duration(&draft.duration),
            published_at: draft.published_at.as_deref().and_then(parse_timestamp),
            video_id: draft.video_id,
            channel_id: draft.channel_id,
            channel_name: draft.channel_name,
            title: draft.title,
            view_count: draft.view_count.max(0),
            like_count: draft.like_count.max(0),
            comment_count: draft.comment_count.max(0),
        }
    }
}

/// Persisted comment row with its sentiment enrichment; append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: String,
    pub video_id: String,
    pub channel_id: String,
    pub comment_text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub sentiment_score: f64,
    pub sentiment: SentimentLabel,
}

impl Comment {
    pub fn from_draft(draft: CommentDraft, sentiment_score: f64) -> Self {
        let score = if sentiment_score.is_finite() {
            sentiment_score.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        Self {
            published_at: draft.published_at.as_deref().and_then(parse_timestamp),
            comment_id: draft.comment_id,
            video_id: draft.video_id,
            channel_id: draft.channel_id,
            comment_text: draft.text.unwrap_or_default(),
            sentiment_score: score,
            sentiment: SentimentLabel::from_score(score),
        }
    }
}

impl Keyed for Channel {
    fn key(&self) -> &str {
        &self.channel_id
    }
}

impl Keyed for Video {
    fn key(&self) -> &str {
        &self.video_id
    }
}

impl Keyed for Comment {
    fn key(&self) -> &str {
        &self.comment_id
    }
}

impl Keyed for CommentDraft {
    fn key(&self) -> &str {
        &self.comment_id
    }
}
