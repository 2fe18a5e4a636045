//! Incremental load: channels are upserted, videos and comments are appended
//! only when their id is not stored yet.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use ytetl_core::{Channel, Comment, Keyed, Video};
use ytetl_storage::Store;

/// Rows to append after dropping in-batch repeats and already-stored keys.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendPlan<T> {
    pub rows: Vec<T>,
    pub repeated: usize,
    pub already_stored: usize,
}

/// `fetched \ existing` by key. The first occurrence of a repeated key wins and
/// fetch order is kept.
pub fn plan_append<T: Keyed + Clone>(fetched: &[T], existing: &HashSet<String>) -> AppendPlan<T> {
    let mut seen = HashSet::with_capacity(fetched.len());
    let mut plan = AppendPlan {
        rows: Vec::new(),
        repeated: 0,
        already_stored: 0,
    };
    for row in fetched {
        if !seen.insert(row.key()) {
            plan.repeated += 1;
        } else if existing.contains(row.key()) {
            plan.already_stored += 1;
        } else {
            plan.rows.push(row.clone());
        }
    }
    plan
}

/// One row per key for upsert. The last occurrence of a repeated key wins and
/// keeps the position where the key first appeared.
pub fn latest_per_key<T: Keyed + Clone>(rows: &[T]) -> Vec<T> {
    let mut slots: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        match slots.get(row.key()) {
            Some(&slot) => out[slot] = row.clone(),
            None => {
                slots.insert(row.key(), out.len());
                out.push(row.clone());
            }
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub channels_upserted: usize,
    pub videos_fetched: usize,
    pub videos_existing: usize,
    pub videos_appended: usize,
    pub comments_fetched: usize,
    pub comments_existing: usize,
    pub comments_appended: usize,
}

impl LoadReport {
    pub fn summary_line(&self) -> String {
        format!(
            "Load complete: {} channels upserted, {} new videos appended, {} new comments appended",
            self.channels_upserted, self.videos_appended, self.comments_appended
        )
    }
}

/// Persist one run's transformed rows. Any store error aborts the load.
pub async fn load(
    store: &dyn Store,
    channels: &[Channel],
    videos: &[Video],
    comments: &[Comment],
) -> Result<LoadReport> {
    let channels = latest_per_key(channels);
    let mut report = LoadReport {
        channels_upserted: channels.len(),
        videos_fetched: videos.len(),
        comments_fetched: comments.len(),
        ..LoadReport::default()
    };

    if channels.is_empty() {
        info!("no channel data to load");
    } else {
        store
            .upsert_channels(&channels)
            .await
            .context("upserting channels")?;
        info!(channels = channels.len(), "channels upserted");
    }

    let existing = store
        .existing_video_ids()
        .await
        .context("reading existing video ids")?;
    let plan = plan_append(videos, &existing);
    info!(
        fetched = videos.len(),
        existing = existing.len(),
        new = plan.rows.len(),
        repeated = plan.repeated,
        "video reconciliation"
    );
    report.videos_existing = plan.already_stored;
    if plan.rows.is_empty() {
        info!("0 new videos; everything fetched is already stored (incremental success)");
    } else {
        store
            .append_videos(&plan.rows)
            .await
            .context("appending new videos")?;
        report.videos_appended = plan.rows.len();
    }

    let existing = store
        .existing_comment_ids()
        .await
        .context("reading existing comment ids")?;
    let plan = plan_append(comments, &existing);
    info!(
        fetched = comments.len(),
        existing = existing.len(),
        new = plan.rows.len(),
        repeated = plan.repeated,
        "comment reconciliation"
    );
    report.comments_existing = plan.already_stored;
    if plan.rows.is_empty() {
        info!("0 new comments; everything fetched is already stored (incremental success)");
    } else {
        store
            .append_comments(&plan.rows)
            .await
            .context("appending new comments")?;
        report.comments_appended = plan.rows.len();
    }

    info!("{}", report.summary_line());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ytetl_core::SentimentLabel;
    use ytetl_storage::MemoryStore;

    fn video(id: &str, title: &str) -> Video {
        Video {
            video_id: id.into(),
            channel_id: "UC1".into(),
            channel_name: "one".into(),
            title: title.into(),
            published_at: None,
            duration_seconds: 10,
            view_count: 0,
            like_count: 0,
            comment_count: 0,
        }
    }

    fn comment(id: &str) -> Comment {
        Comment {
            comment_id: id.into(),
            video_id: "v1".into(),
            channel_id: "UC1".into(),
            comment_text: "ok".into(),
            published_at: None,
            sentiment_score: 0.0,
            sentiment: SentimentLabel::Neutral,
        }
    }

    fn channel(id: &str) -> Channel {
        channel_with_subscribers(id, 1)
    }

    fn channel_with_subscribers(id: &str, subscribers: i64) -> Channel {
        Channel {
            channel_id: id.into(),
            channel_name: "one".into(),
            view_count: 5,
            video_count: 2,
            subscriber_count: subscribers,
            updated_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn plan_is_set_difference_with_first_occurrence_kept() {
        let fetched = vec![video("a", "first"), video("b", "b"), video("a", "second"), video("c", "c")];
        let existing: HashSet<String> = ["b".to_string()].into();

        let plan = plan_append(&fetched, &existing);
        let ids: Vec<_> = plan.rows.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(plan.rows[0].title, "first");
        assert_eq!(plan.repeated, 1);
        assert_eq!(plan.already_stored, 1);
    }

    #[test]
    fn plan_is_deterministic() {
        let fetched = vec![comment("x"), comment("y")];
        let existing: HashSet<String> = ["y".to_string()].into();
        assert_eq!(plan_append(&fetched, &existing), plan_append(&fetched, &existing));
    }

    #[test]
    fn latest_per_key_keeps_last_value_in_first_position() {
        let rows = vec![
            channel_with_subscribers("UCa", 1),
            channel_with_subscribers("UCb", 7),
            channel_with_subscribers("UCa", 2),
        ];
        let latest = latest_per_key(&rows);
        let got: Vec<_> = latest
            .iter()
            .map(|c| (c.channel_id.as_str(), c.subscriber_count))
            .collect();
        assert_eq!(got, [("UCa", 2), ("UCb", 7)]);
    }

    #[tokio::test]
    async fn repeated_channel_in_one_batch_is_upserted_once_with_the_last_value() {
        let store = MemoryStore::new();
        let channels = vec![channel_with_subscribers("UCa", 1), channel_with_subscribers("UCa", 2)];

        let report = load(&store, &channels, &[], &[]).await.unwrap();
        assert_eq!(report.channels_upserted, 1);

        let stored = store.channels().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].subscriber_count, 2);
    }

    #[test]
    fn summary_line_matches_log_format() {
        let report = LoadReport {
            channels_upserted: 6,
            videos_appended: 3,
            comments_appended: 41,
            ..LoadReport::default()
        };
        assert_eq!(
            report.summary_line(),
            "Load complete: 6 channels upserted, 3 new videos appended, 41 new comments appended"
        );
    }

    #[tokio::test]
    async fn loading_the_same_batch_twice_appends_nothing_the_second_time() {
        let store = MemoryStore::new();
        let channels = vec![channel("UC1")];
        let videos = vec![video("v1", "one"), video("v2", "two")];
        let comments = vec![comment("c1")];

        let first = load(&store, &channels, &videos, &comments).await.unwrap();
        assert_eq!((first.videos_appended, first.comments_appended), (2, 1));

        let second = load(&store, &channels, &videos, &comments).await.unwrap();
        assert_eq!(second.channels_upserted, 1);
        assert_eq!((second.videos_appended, second.comments_appended), (0, 0));
        assert_eq!((second.videos_existing, second.comments_existing), (2, 1));
        assert_eq!(store.videos().await.len(), 2);
        assert_eq!(store.channels().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_run_is_a_success() {
        let store = MemoryStore::new();
        let report = load(&store, &[], &[], &[]).await.unwrap();
        assert_eq!(report, LoadReport::default());
    }
}
