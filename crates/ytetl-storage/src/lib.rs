//! Durable store boundary: PostgreSQL via sqlx, plus an in-memory store for tests and dry runs.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};
use ytetl_core::{Channel, Comment, Keyed, Video};

pub const CRATE_NAME: &str = "ytetl-storage";

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error("duplicate key {key} in {table}")]
    DuplicateKey { table: &'static str, key: String },
}

/// Persistence operations the reconciler needs.
///
/// Channels are upserted; videos and comments are append-only and callers are
/// expected to pass only keys absent from the corresponding `existing_*` set.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_channels(&self, channels: &[Channel]) -> Result<u64, StoreError>;
    async fn existing_video_ids(&self) -> Result<HashSet<String>, StoreError>;
    async fn append_videos(&self, videos: &[Video]) -> Result<u64, StoreError>;
    async fn existing_comment_ids(&self) -> Result<HashSet<String>, StoreError>;
    async fn append_comments(&self, comments: &[Comment]) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    async fn key_set(&self, sql: &str) -> Result<HashSet<String>, StoreError> {
        let keys: Vec<String> = sqlx::query_scalar(sql).fetch_all(&self.pool).await?;
        Ok(keys.into_iter().collect())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_channels(&self, channels: &[Channel]) -> Result<u64, StoreError> {
        if channels.is_empty() {
            return Ok(0);
        }
        let span = info_span!("db_write", table = "channels", rows = channels.len());
        async {
            let mut ids = Vec::with_capacity(channels.len());
            let mut names = Vec::with_capacity(channels.len());
            let mut views = Vec::with_capacity(channels.len());
            let mut videos = Vec::with_capacity(channels.len());
            let mut subscribers = Vec::with_capacity(channels.len());
            let mut updated: Vec<DateTime<Utc>> = Vec::with_capacity(channels.len());
            for c in channels {
                ids.push(c.channel_id.clone());
                names.push(c.channel_name.clone());
                views.push(c.view_count);
                videos.push(c.video_count);
                subscribers.push(c.subscriber_count);
                updated.push(c.updated_at);
            }

            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"
                INSERT INTO channels (channel_id, channel_name, views, total_videos, subscribers, updated_at)
                SELECT * FROM UNNEST($1::text[], $2::text[], $3::bigint[], $4::bigint[], $5::bigint[], $6::timestamptz[])
                ON CONFLICT (channel_id) DO UPDATE SET
                    channel_name = EXCLUDED.channel_name,
                    views = EXCLUDED.views,
                    total_videos = EXCLUDED.total_videos,
                    subscribers = EXCLUDED.subscribers,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&ids)
            .bind(&names)
            .bind(&views)
            .bind(&videos)
            .bind(&subscribers)
            .bind(&updated)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            debug!(rows = result.rows_affected(), "channels upserted");
            Ok::<_, StoreError>(result.rows_affected())
        }
        .instrument(span)
        .await
    }

    async fn existing_video_ids(&self) -> Result<HashSet<String>, StoreError> {
        self.key_set("SELECT video_id FROM videos").await
    }

    async fn append_videos(&self, videos: &[Video]) -> Result<u64, StoreError> {
        if videos.is_empty() {
            return Ok(0);
        }
        let span = info_span!("db_write", table = "videos", rows = videos.len());
        async {
            let mut ids = Vec::with_capacity(videos.len());
            let mut channel_ids = Vec::with_capacity(videos.len());
            let mut channel_names = Vec::with_capacity(videos.len());
            let mut titles = Vec::with_capacity(videos.len());
            let mut published: Vec<Option<DateTime<Utc>>> = Vec::with_capacity(videos.len());
            let mut durations = Vec::with_capacity(videos.len());
            let mut views = Vec::with_capacity(videos.len());
            let mut likes = Vec::with_capacity(videos.len());
            let mut comment_counts = Vec::with_capacity(videos.len());
            for v in videos {
                ids.push(v.video_id.clone());
                channel_ids.push(v.channel_id.clone());
                channel_names.push(v.channel_name.clone());
                titles.push(v.title.clone());
                published.push(v.published_at);
                durations.push(v.duration_seconds);
                views.push(v.view_count);
                likes.push(v.like_count);
                comment_counts.push(v.comment_count);
            }

            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"
                INSERT INTO videos (video_id, channel_id, channel_name, title, published_at, duration, view_count, like_count, comment_count)
                SELECT * FROM UNNEST(
                    $1::text[], $2::text[], $3::text[], $4::text[], $5::timestamptz[],
                    $6::bigint[], $7::bigint[], $8::bigint[], $9::bigint[]
                )
                "#,
            )
            .bind(&ids)
            .bind(&channel_ids)
            .bind(&channel_names)
            .bind(&titles)
            .bind(&published)
            .bind(&durations)
            .bind(&views)
            .bind(&likes)
            .bind(&comment_counts)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok::<_, StoreError>(result.rows_affected())
        }
        .instrument(span)
        .await
    }

    async fn existing_comment_ids(&self) -> Result<HashSet<String>, StoreError> {
        self.key_set("SELECT comment_id FROM comments").await
    }

    async fn append_comments(&self, comments: &[Comment]) -> Result<u64, StoreError> {
        if comments.is_empty() {
            return Ok(0);
        }
        let span = info_span!("db_write", table = "comments", rows = comments.len());
        async {
            let mut ids = Vec::with_capacity(comments.len());
            let mut video_ids = Vec::with_capacity(comments.len());
            let mut channel_ids = Vec::with_capacity(comments.len());
            let mut texts = Vec::with_capacity(comments.len());
            let mut published: Vec<Option<DateTime<Utc>>> = Vec::with_capacity(comments.len());
            let mut scores = Vec::with_capacity(comments.len());
            let mut labels = Vec::with_capacity(comments.len());
            for c in comments {
                ids.push(c.comment_id.clone());
                video_ids.push(c.video_id.clone());
                channel_ids.push(c.channel_id.clone());
                texts.push(c.comment_text.clone());
                published.push(c.published_at);
                scores.push(c.sentiment_score);
                labels.push(c.sentiment.as_str().to_string());
            }

            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"
                INSERT INTO comments (comment_id, video_id, channel_id, comment_text, published_at, vader_score, vader_sentiment)
                SELECT * FROM UNNEST(
                    $1::text[], $2::text[], $3::text[], $4::text[], $5::timestamptz[],
                    $6::float8[], $7::text[]
                )
                "#,
            )
            .bind(&ids)
            .bind(&video_ids)
            .bind(&channel_ids)
            .bind(&texts)
            .bind(&published)
            .bind(&scores)
            .bind(&labels)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok::<_, StoreError>(result.rows_affected())
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Default)]
struct MemoryTables {
    channels: BTreeMap<String, Channel>,
    videos: BTreeMap<String, Video>,
    comments: BTreeMap<String, Comment>,
}

/// Store backed by ordered maps. Appends enforce key uniqueness the same way
/// the primary keys do in PostgreSQL, and a rejected append writes nothing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn channels(&self) -> Vec<Channel> {
        self.tables.lock().await.channels.values().cloned().collect()
    }

    pub async fn videos(&self) -> Vec<Video> {
        self.tables.lock().await.videos.values().cloned().collect()
    }

    pub async fn comments(&self) -> Vec<Comment> {
        self.tables.lock().await.comments.values().cloned().collect()
    }
}

fn append_unique<T: Keyed + Clone>(
    table: &'static str,
    rows: &mut BTreeMap<String, T>,
    incoming: &[T],
) -> Result<u64, StoreError> {
    let mut seen = HashSet::with_capacity(incoming.len());
    for row in incoming {
        if rows.contains_key(row.key()) || !seen.insert(row.key()) {
            return Err(StoreError::DuplicateKey {
                table,
                key: row.key().to_string(),
            });
        }
    }
    for row in incoming {
        rows.insert(row.key().to_string(), row.clone());
    }
    Ok(incoming.len() as u64)
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_channels(&self, channels: &[Channel]) -> Result<u64, StoreError> {
        // Postgres refuses to update the same row twice in one statement.
        let mut seen = HashSet::with_capacity(channels.len());
        if let Some(repeated) = channels.iter().find(|c| !seen.insert(c.key())) {
            return Err(StoreError::DuplicateKey {
                table: "channels",
                key: repeated.key().to_string(),
            });
        }

        let mut tables = self.tables.lock().await;
        for channel in channels {
            tables
                .channels
                .insert(channel.channel_id.clone(), channel.clone());
        }
        Ok(channels.len() as u64)
    }

    async fn existing_video_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.tables.lock().await.videos.keys().cloned().collect())
    }

    async fn append_videos(&self, videos: &[Video]) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        append_unique("videos", &mut tables.videos, videos)
    }

    async fn existing_comment_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.tables.lock().await.comments.keys().cloned().collect())
    }

    async fn append_comments(&self, comments: &[Comment]) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        append_unique("comments", &mut tables.comments, comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ytetl_core::SentimentLabel;

    fn channel(id: &str, subscribers: i64, hour: u32) -> Channel {
        Channel {
            channel_id: id.to_string(),
            channel_name: format!("{id} name"),
            view_count: 1_000,
            video_count: 12,
            subscriber_count: subscribers,
            updated_at: Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
        }
    }

    fn video(id: &str) -> Video {
        Video {
            video_id: id.to_string(),
            channel_id: "UC1".into(),
            channel_name: "one".into(),
            title: format!("video {id}"),
            published_at: None,
            duration_seconds: 60,
            view_count: 1,
            like_count: 0,
            comment_count: 0,
        }
    }

    fn comment(id: &str) -> Comment {
        Comment {
            comment_id: id.to_string(),
            video_id: "v1".into(),
            channel_id: "UC1".into(),
            comment_text: "nice".into(),
            published_at: None,
            sentiment_score: 0.4,
            sentiment: SentimentLabel::Positive,
        }
    }

    #[tokio::test]
    async fn upserting_twice_equals_upserting_once() {
        let store = MemoryStore::new();
        let batch = vec![channel("UC1", 10, 6), channel("UC2", 20, 6)];
        store.upsert_channels(&batch).await.unwrap();
        let once = store.channels().await;
        store.upsert_channels(&batch).await.unwrap();
        assert_eq!(store.channels().await, once);
    }

    #[tokio::test]
    async fn upsert_overwrites_non_key_fields() {
        let store = MemoryStore::new();
        store.upsert_channels(&[channel("UC1", 10, 6)]).await.unwrap();
        store.upsert_channels(&[channel("UC1", 99, 18)]).await.unwrap();

        let channels = store.channels().await;
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].subscriber_count, 99);
        assert_eq!(
            channels[0].updated_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn upsert_rejects_repeated_keys_within_a_batch() {
        let store = MemoryStore::new();
        let err = store
            .upsert_channels(&[channel("UC1", 10, 6), channel("UC2", 5, 6), channel("UC1", 11, 7)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { table: "channels", ref key } if key == "UC1"));
        assert!(store.channels().await.is_empty());
    }

    #[tokio::test]
    async fn append_rejects_existing_keys_without_partial_writes() {
        let store = MemoryStore::new();
        store.append_videos(&[video("v1")]).await.unwrap();

        let err = store
            .append_videos(&[video("v2"), video("v1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { table: "videos", ref key } if key == "v1"));
        assert_eq!(store.existing_video_ids().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_rejects_repeated_keys_within_a_batch() {
        let store = MemoryStore::new();
        let err = store
            .append_comments(&[comment("c1"), comment("c1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { table: "comments", .. }));
        assert!(store.comments().await.is_empty());
    }

    #[tokio::test]
    async fn existing_ids_track_appends() {
        let store = MemoryStore::new();
        assert!(store.existing_comment_ids().await.unwrap().is_empty());
        assert_eq!(store.append_comments(&[comment("c1"), comment("c2")]).await.unwrap(), 2);
        assert_eq!(store.append_comments(&[]).await.unwrap(), 0);

        let ids = store.existing_comment_ids().await.unwrap();
        assert!(ids.contains("c1") && ids.contains("c2"));
    }
}
