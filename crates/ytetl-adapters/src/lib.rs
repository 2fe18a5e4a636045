//! Upstream source contracts + the YouTube Data API adapter.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};
use ytetl_core::{parse_count, ChannelDraft, CommentDraft, RawDuration, VideoDraft};

pub mod pagination;
pub mod sentiment;

pub use pagination::{BatchedFetch, Completion, Deadline, FetchPolicy, PagedFetch, PaginationFetcher};
pub use sentiment::{categorize, score_text, LexiconScorer, SentimentScorer};

pub const CRATE_NAME: &str = "ytetl-adapters";

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transient failure calling {endpoint}: {message}")]
    Transient { endpoint: String, message: String },
    #[error("http status {status} from {endpoint}: {message}")]
    HttpStatus {
        status: u16,
        endpoint: String,
        message: String,
    },
    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },
    #[error("undecodable {endpoint} response: {message}")]
    Decode { endpoint: String, message: String },
}

impl SourceError {
    pub fn transient(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn status(status: u16, endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Transient { .. } => RetryDisposition::Retryable,
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            Self::Request { .. } | Self::Decode { .. } => RetryDisposition::NonRetryable,
        }
    }

    /// 403 covers both exhausted quota and disabled resources (e.g. comments turned off).
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 403, .. })
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }

    pub fn with_cursor(items: Vec<T>, cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: Some(cursor.into()),
        }
    }

    /// An empty cursor string means the same as no cursor.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }
}

/// Read access to the video platform. Every call is a single request; retry and
/// pacing policy lives in [`PaginationFetcher`].
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn channels(&self, channel_ids: &[String]) -> Result<Vec<ChannelDraft>, SourceError>;

    /// Video ids listed in a playlist, one page at a time.
    async fn playlist_page(
        &self,
        playlist_id: &str,
        cursor: Option<&str>,
        max_results: u32,
    ) -> Result<Page<String>, SourceError>;

    async fn videos(
        &self,
        video_ids: &[String],
        owner: &ChannelDraft,
    ) -> Result<Vec<VideoDraft>, SourceError>;

    /// Top-level comment threads of a video, one page at a time.
    async fn comment_page(
        &self,
        video_id: &str,
        cursor: Option<&str>,
        max_results: u32,
    ) -> Result<Page<CommentDraft>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct YoutubeClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl YoutubeClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug)]
pub struct YoutubeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl YoutubeClient {
    pub fn new(config: YoutubeClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    async fn get_json(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<JsonValue, SourceError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let span = info_span!("api_request", endpoint);

        async {
            let resp = self
                .client
                .get(&url)
                .query(params)
                .query(&[("key", self.api_key.as_str())])
                .send()
                .await
                .map_err(|err| request_error(endpoint, err))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(SourceError::status(
                    status.as_u16(),
                    endpoint,
                    api_error_message(&body).unwrap_or_else(|| status.to_string()),
                ));
            }

            resp.json::<JsonValue>().await.map_err(|err| {
                let timed_out = err.is_timeout();
                let message = redacted(err);
                if timed_out {
                    SourceError::transient(endpoint, message)
                } else {
                    SourceError::Decode {
                        endpoint: endpoint.to_string(),
                        message,
                    }
                }
            })
        }
        .instrument(span)
        .await
    }
}

fn request_error(endpoint: &str, err: reqwest::Error) -> SourceError {
    let disposition = classify_reqwest_error(&err);
    let message = redacted(err);
    match disposition {
        RetryDisposition::Retryable => SourceError::transient(endpoint, message),
        RetryDisposition::NonRetryable => SourceError::Request {
            endpoint: endpoint.to_string(),
            message,
        },
    }
}

/// Error text without the request URL, which carries the API key.
fn redacted(err: reqwest::Error) -> String {
    err.without_url().to_string()
}

/// Pull `error.message` out of a Google API error body.
fn api_error_message(body: &str) -> Option<String> {
    let value: JsonValue = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(ToString::to_string)
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<JsonValue>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

impl ListResponse {
    fn decode(endpoint: &str, value: JsonValue) -> Result<Self, SourceError> {
        serde_json::from_value(value).map_err(|err| SourceError::Decode {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        })
    }

    /// Items that do not match the expected shape are skipped, not fatal.
    fn typed_items<T: DeserializeOwned>(&self, endpoint: &str) -> Vec<T> {
        self.items
            .iter()
            .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!(endpoint, error = %err, "skipping malformed item");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct TitleSnippet {
    #[serde(default)]
    title: String,
    #[serde(rename = "publishedAt", default)]
    published_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Statistics {
    #[serde(rename = "viewCount", default)]
    view_count: Option<String>,
    #[serde(rename = "videoCount", default)]
    video_count: Option<String>,
    #[serde(rename = "subscriberCount", default)]
    subscriber_count: Option<String>,
    #[serde(rename = "likeCount", default)]
    like_count: Option<String>,
    #[serde(rename = "commentCount", default)]
    comment_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    #[serde(default)]
    snippet: TitleSnippet,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    #[serde(rename = "contentDetails")]
    content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemContentDetails {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: TitleSnippet,
    #[serde(rename = "contentDetails", default)]
    content_details: VideoContentDetails,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Debug, Default, Deserialize)]
struct VideoContentDetails {
    #[serde(default)]
    duration: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct CommentThreadItem {
    snippet: CommentThreadSnippet,
}

#[derive(Debug, Deserialize)]
struct CommentThreadSnippet {
    #[serde(rename = "topLevelComment")]
    top_level_comment: TopLevelComment,
}

#[derive(Debug, Deserialize)]
struct TopLevelComment {
    id: String,
    snippet: TopLevelCommentSnippet,
}

#[derive(Debug, Deserialize)]
struct TopLevelCommentSnippet {
    #[serde(rename = "videoId", default)]
    video_id: Option<String>,
    #[serde(rename = "channelId", default)]
    channel_id: Option<String>,
    #[serde(rename = "textOriginal", default)]
    text_original: Option<JsonValue>,
    #[serde(rename = "publishedAt", default)]
    published_at: Option<String>,
}

fn channel_from_item(item: ChannelItem) -> ChannelDraft {
    ChannelDraft {
        channel_id: item.id,
        channel_name: item.snippet.title,
        view_count: parse_count(item.statistics.view_count.as_deref()),
        video_count: parse_count(item.statistics.video_count.as_deref()),
        subscriber_count: parse_count(item.statistics.subscriber_count.as_deref()),
    }
}

fn video_from_item(item: VideoItem, owner: &ChannelDraft) -> VideoDraft {
    VideoDraft {
        video_id: item.id,
        channel_id: owner.channel_id.clone(),
        channel_name: owner.channel_name.clone(),
        title: item.snippet.title,
        published_at: item.snippet.published_at,
        duration: RawDuration::from_json(item.content_details.duration.as_ref()),
        view_count: parse_count(item.statistics.view_count.as_deref()),
        like_count: parse_count(item.statistics.like_count.as_deref()),
        comment_count: parse_count(item.statistics.comment_count.as_deref()),
    }
}

fn comment_from_item(item: CommentThreadItem, requested_video_id: &str) -> CommentDraft {
    let top = item.snippet.top_level_comment;
    CommentDraft {
        comment_id: top.id,
        video_id: top
            .snippet
            .video_id
            .unwrap_or_else(|| requested_video_id.to_string()),
        channel_id: top.snippet.channel_id.unwrap_or_default(),
        text: top
            .snippet
            .text_original
            .as_ref()
            .and_then(JsonValue::as_str)
            .map(ToString::to_string),
        published_at: top.snippet.published_at,
    }
}

#[async_trait]
impl VideoSource for YoutubeClient {
    async fn channels(&self, channel_ids: &[String]) -> Result<Vec<ChannelDraft>, SourceError> {
        let endpoint = "channels";
        let value = self
            .get_json(
                endpoint,
                &[
                    ("part", "snippet,contentDetails,statistics".to_string()),
                    ("id", channel_ids.join(",")),
                ],
            )
            .await?;
        let resp = ListResponse::decode(endpoint, value)?;
        Ok(resp
            .typed_items::<ChannelItem>(endpoint)
            .into_iter()
            .map(channel_from_item)
            .collect())
    }

    async fn playlist_page(
        &self,
        playlist_id: &str,
        cursor: Option<&str>,
        max_results: u32,
    ) -> Result<Page<String>, SourceError> {
        let endpoint = "playlistItems";
        let mut params = vec![
            ("part", "contentDetails".to_string()),
            ("playlistId", playlist_id.to_string()),
            ("maxResults", max_results.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("pageToken", cursor.to_string()));
        }
        let resp = ListResponse::decode(endpoint, self.get_json(endpoint, &params).await?)?;
        let items = resp
            .typed_items::<PlaylistItem>(endpoint)
            .into_iter()
            .map(|item| item.content_details.video_id)
            .collect();
        Ok(Page {
            items,
            next_cursor: resp.next_page_token,
        })
    }

    async fn videos(
        &self,
        video_ids: &[String],
        owner: &ChannelDraft,
    ) -> Result<Vec<VideoDraft>, SourceError> {
        let endpoint = "videos";
        let value = self
            .get_json(
                endpoint,
                &[
                    ("part", "snippet,contentDetails,statistics".to_string()),
                    ("id", video_ids.join(",")),
                ],
            )
            .await?;
        let resp = ListResponse::decode(endpoint, value)?;
        Ok(resp
            .typed_items::<VideoItem>(endpoint)
            .into_iter()
            .map(|item| video_from_item(item, owner))
            .collect())
    }

    async fn comment_page(
        &self,
        video_id: &str,
        cursor: Option<&str>,
        max_results: u32,
    ) -> Result<Page<CommentDraft>, SourceError> {
        let endpoint = "commentThreads";
        let mut params = vec![
            ("part", "snippet".to_string()),
            ("videoId", video_id.to_string()),
            ("maxResults", max_results.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("pageToken", cursor.to_string()));
        }
        let resp = ListResponse::decode(endpoint, self.get_json(endpoint, &params).await?)?;
        let items = resp
            .typed_items::<CommentThreadItem>(endpoint)
            .into_iter()
            .map(|item| comment_from_item(item, video_id))
            .collect();
        Ok(Page {
            items,
            next_cursor: resp.next_page_token,
        })
    }
}
