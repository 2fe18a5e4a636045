use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ytetl_adapters::{Page, SourceError, VideoSource};
use ytetl_core::{
    Channel, ChannelDraft, Comment, CommentDraft, RawDuration, SentimentLabel, Video, VideoDraft,
};
use ytetl_storage::{MemoryStore, Store, StoreError};
use ytetl_sync::{RunStatus, SnapshotWriter, Stage, SyncPipeline};

#[derive(Default)]
struct FakeSource {
    channels: Vec<ChannelDraft>,
    playlists: HashMap<String, Vec<String>>,
    videos: HashMap<String, VideoDraft>,
    comments: HashMap<String, Result<Vec<CommentDraft>, u16>>,
    /// Simulated latency of the channel statistics lookup.
    channel_delay: Duration,
}

#[async_trait]
impl VideoSource for FakeSource {
    async fn channels(&self, channel_ids: &[String]) -> Result<Vec<ChannelDraft>, SourceError> {
        tokio::time::sleep(self.channel_delay).await;
        Ok(self
            .channels
            .iter()
            .filter(|c| channel_ids.contains(&c.channel_id))
            .cloned()
            .collect())
    }

    async fn playlist_page(
        &self,
        playlist_id: &str,
        cursor: Option<&str>,
        _max_results: u32,
    ) -> Result<Page<String>, SourceError> {
        let ids = self.playlists.get(playlist_id).cloned().unwrap_or_default();
        // One id per page exercises cursor following.
        let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let items = ids.get(index).cloned().into_iter().collect();
        if index + 1 < ids.len() {
            Ok(Page::with_cursor(items, (index + 1).to_string()))
        } else {
            Ok(Page::last(items))
        }
    }

    async fn videos(
        &self,
        video_ids: &[String],
        _owner: &ChannelDraft,
    ) -> Result<Vec<VideoDraft>, SourceError> {
        Ok(video_ids
            .iter()
            .filter_map(|id| self.videos.get(id).cloned())
            .collect())
    }

    async fn comment_page(
        &self,
        video_id: &str,
        _cursor: Option<&str>,
        _max_results: u32,
    ) -> Result<Page<CommentDraft>, SourceError> {
        match self.comments.get(video_id) {
            Some(Ok(comments)) => Ok(Page::last(comments.clone())),
            Some(Err(status)) => Err(SourceError::status(*status, "commentThreads", "commentsDisabled")),
            None => Ok(Page::last(Vec::new())),
        }
    }
}

fn video_draft(id: &str, duration: &str) -> VideoDraft {
    VideoDraft {
        video_id: id.into(),
        channel_id: "UCone".into(),
        channel_name: "One".into(),
        title: format!("Video {id}"),
        published_at: Some("2025-02-01T10:00:00Z".into()),
        duration: RawDuration::from(duration),
        view_count: 100,
        like_count: 5,
        comment_count: 2,
    }
}

fn comment_draft(id: &str, video_id: &str, text: &str) -> CommentDraft {
    CommentDraft {
        comment_id: id.into(),
        video_id: video_id.into(),
        channel_id: "UCone".into(),
        text: Some(text.into()),
        published_at: Some("2025-02-02T08:30:00Z".into()),
    }
}

fn one_channel_source() -> FakeSource {
    FakeSource {
        channels: vec![ChannelDraft {
            channel_id: "UCone".into(),
            channel_name: "One".into(),
            view_count: 10_000,
            video_count: 2,
            subscriber_count: 300,
        }],
        playlists: HashMap::from([("UUone".to_string(), vec!["v1".to_string(), "v2".to_string()])]),
        videos: HashMap::from([
            ("v1".to_string(), video_draft("v1", "PT10M")),
            ("v2".to_string(), video_draft("v2", "PT4M36S")),
        ]),
        comments: HashMap::from([
            ("v1".to_string(), Ok(vec![comment_draft("c1", "v1", "Great video, very helpful")])),
            (
                "v2".to_string(),
                Ok(vec![
                    comment_draft("c2", "v2", "This is a terrible scam"),
                    comment_draft("c2", "v2", "This is a terrible scam"),
                    comment_draft("c3", "v2", ""),
                ]),
            ),
        ]),
        channel_delay: Duration::ZERO,
    }
}

async fn store_with_v1() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let mut v1 = Video::from_draft(video_draft("v1", "PT10M"));
    v1.title = "stored earlier".into();
    store.append_videos(&[v1]).await.unwrap();
    store
}

#[tokio::test(start_paused = true)]
async fn incremental_run_appends_only_new_rows() {
    let store = store_with_v1().await;
    let pipeline = SyncPipeline::new(Arc::new(one_channel_source()), store.clone());
    let channel_ids = vec!["UCone".to_string()];

    let summary = pipeline.run_once(&channel_ids).await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.records(Stage::ExtractVideos), Some(2));
    assert_eq!(summary.records(Stage::ExtractComments), Some(2));

    let report = summary.load.unwrap();
    assert_eq!(report.channels_upserted, 1);
    assert_eq!((report.videos_fetched, report.videos_existing, report.videos_appended), (2, 1, 1));
    assert_eq!((report.comments_fetched, report.comments_appended), (2, 2));

    let videos = store.videos().await;
    assert_eq!(videos.len(), 2);
    let v1 = videos.iter().find(|v| v.video_id == "v1").unwrap();
    assert_eq!(v1.title, "stored earlier");
    let v2 = videos.iter().find(|v| v.video_id == "v2").unwrap();
    assert_eq!(v2.duration_seconds, 276);

    let comments: HashMap<String, Comment> = store
        .comments()
        .await
        .into_iter()
        .map(|c| (c.comment_id.clone(), c))
        .collect();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments["c1"].sentiment, SentimentLabel::Positive);
    assert_eq!(comments["c2"].sentiment, SentimentLabel::Negative);
    assert!(comments["c2"].published_at.is_some());

    let channels: Vec<Channel> = store.channels().await;
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].subscriber_count, 300);

    let again = pipeline.run_once(&channel_ids).await.unwrap();
    let report = again.load.unwrap();
    assert_eq!((report.videos_appended, report.comments_appended), (0, 0));
    assert_eq!(store.videos().await.len(), 2);
    assert_eq!(store.comments().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn disabled_comments_degrade_to_partial_results() {
    let mut source = one_channel_source();
    source.comments.insert("v2".to_string(), Err(403));
    let store = Arc::new(MemoryStore::new());
    let pipeline = SyncPipeline::new(Arc::new(source), store.clone());

    let summary = pipeline.run_once(&["UCone".to_string()]).await.unwrap();
    let report = summary.load.unwrap();
    assert_eq!(report.videos_appended, 2);
    assert_eq!(report.comments_appended, 1);
    let ids: HashSet<String> = store.existing_comment_ids().await.unwrap();
    assert!(ids.contains("c1"));
}

#[tokio::test(start_paused = true)]
async fn unknown_channels_and_expired_deadline_yield_empty_success() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = SyncPipeline::new(Arc::new(one_channel_source()), store.clone());
    let summary = pipeline.run_once(&["UCmissing".to_string()]).await.unwrap();
    assert_eq!(summary.load.unwrap().channels_upserted, 0);

    let pipeline = SyncPipeline::new(Arc::new(one_channel_source()), store.clone())
        .with_run_budget(Duration::ZERO);
    let summary = pipeline.run_once(&["UCone".to_string()]).await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.records(Stage::ExtractChannels), Some(0));
    assert!(store.videos().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn data_gathered_before_the_deadline_is_still_loaded() {
    let mut source = one_channel_source();
    source.channel_delay = Duration::from_millis(600);
    let store = Arc::new(MemoryStore::new());
    let pipeline = SyncPipeline::new(Arc::new(source), store.clone())
        .with_run_budget(Duration::from_millis(500));

    let summary = pipeline.run_once(&["UCone".to_string()]).await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);

    let channels_stage = summary.stage(Stage::ExtractChannels).unwrap();
    assert_eq!(channels_stage.records, 1);
    assert!(!channels_stage.deadline_reached);
    let videos_stage = summary.stage(Stage::ExtractVideos).unwrap();
    assert_eq!(videos_stage.records, 0);
    assert!(videos_stage.deadline_reached);
    assert_eq!(summary.records(Stage::ExtractComments), Some(0));

    let report = summary.load.unwrap();
    assert_eq!(report.channels_upserted, 1);
    assert_eq!(report.videos_appended, 0);
    let channels = store.channels().await;
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].subscriber_count, 300);
    assert!(store.videos().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deadline_during_playlist_paging_skips_video_details() {
    // Two single-id pages with 1 s pacing: the budget runs out before page two.
    let store = Arc::new(MemoryStore::new());
    let pipeline = SyncPipeline::new(Arc::new(one_channel_source()), store.clone())
        .with_run_budget(Duration::from_millis(500));

    let summary = pipeline.run_once(&["UCone".to_string()]).await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert!(summary.stage(Stage::ExtractVideos).unwrap().deadline_reached);
    assert_eq!(summary.load.unwrap().channels_upserted, 1);
    assert_eq!(store.channels().await.len(), 1);
    assert!(store.videos().await.is_empty());
}

struct BrokenStore;

#[async_trait]
impl Store for BrokenStore {
    async fn upsert_channels(&self, _: &[Channel]) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn existing_video_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(HashSet::new())
    }

    async fn append_videos(&self, videos: &[Video]) -> Result<u64, StoreError> {
        Err(StoreError::DuplicateKey {
            table: "videos",
            key: videos[0].video_id.clone(),
        })
    }

    async fn existing_comment_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(HashSet::new())
    }

    async fn append_comments(&self, _: &[Comment]) -> Result<u64, StoreError> {
        Ok(0)
    }
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_fails_the_run_and_is_snapshotted() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = SyncPipeline::new(Arc::new(one_channel_source()), Arc::new(BrokenStore))
        .with_snapshots(SnapshotWriter::new(tmp.path()));

    let err = pipeline.run_once(&["UCone".to_string()]).await.unwrap_err();
    assert!(format!("{err:#}").contains("appending new videos"));

    let run_dir = std::fs::read_dir(tmp.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(run_dir.join("run_summary.json")).unwrap()).unwrap();
    assert_eq!(summary["status"], "failed");
    assert!(summary["error"].as_str().unwrap().contains("duplicate key v1"));

    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(run_dir.join("manifest.json")).unwrap()).unwrap();
    let names: Vec<&str> = manifest["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        [
            "extract_channels",
            "extract_videos",
            "extract_comments",
            "transform_channels",
            "transform_videos",
            "transform_comments"
        ]
    );
}
