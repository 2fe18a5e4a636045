//! Write-only parquet snapshots of stage outputs, one directory per run.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use ytetl_core::{Channel, ChannelDraft, Comment, CommentDraft, RawDuration, Video, VideoDraft};

use crate::RunSummary;

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn begin(&self, run_id: Uuid) -> Result<RunSnapshot> {
        let dir = self.root.join(run_id.to_string());
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(RunSnapshot {
            run_id,
            dir,
            files: Vec::new(),
        })
    }
}

/// Snapshot files written so far for one run.
#[derive(Debug)]
pub struct RunSnapshot {
    run_id: Uuid,
    dir: PathBuf,
    files: Vec<ParquetManifestFile>,
}

impl RunSnapshot {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn channel_drafts(&mut self, drafts: &[ChannelDraft]) -> Result<()> {
        let batch = record_batch(
            "extract_channels",
            vec![
                utf8("channel_id", drafts.iter().map(|d| Some(d.channel_id.as_str()))),
                utf8("channel_name", drafts.iter().map(|d| Some(d.channel_name.as_str()))),
                int64("view_count", drafts.iter().map(|d| d.view_count)),
                int64("video_count", drafts.iter().map(|d| d.video_count)),
                int64("subscriber_count", drafts.iter().map(|d| d.subscriber_count)),
            ],
        )?;
        self.write("extract_channels", batch)
    }

    pub fn video_drafts(&mut self, drafts: &[VideoDraft]) -> Result<()> {
        let durations: Vec<Option<String>> = drafts.iter().map(|d| raw_duration_text(&d.duration)).collect();
        let batch = record_batch(
            "extract_videos",
            vec![
                utf8("video_id", drafts.iter().map(|d| Some(d.video_id.as_str()))),
                utf8("channel_id", drafts.iter().map(|d| Some(d.channel_id.as_str()))),
                utf8("title", drafts.iter().map(|d| Some(d.title.as_str()))),
                utf8("published_at", drafts.iter().map(|d| d.published_at.as_deref())),
                utf8("duration", durations.iter().map(|d| d.as_deref())),
                int64("view_count", drafts.iter().map(|d| d.view_count)),
                int64("like_count", drafts.iter().map(|d| d.like_count)),
                int64("comment_count", drafts.iter().map(|d| d.comment_count)),
            ],
        )?;
        self.write("extract_videos", batch)
    }

    pub fn comment_drafts(&mut self, drafts: &[CommentDraft]) -> Result<()> {
        let batch = record_batch(
            "extract_comments",
            vec![
                utf8("comment_id", drafts.iter().map(|d| Some(d.comment_id.as_str()))),
                utf8("video_id", drafts.iter().map(|d| Some(d.video_id.as_str()))),
                utf8("channel_id", drafts.iter().map(|d| Some(d.channel_id.as_str()))),
                utf8("comment_text", drafts.iter().map(|d| d.text.as_deref())),
                utf8("published_at", drafts.iter().map(|d| d.published_at.as_deref())),
            ],
        )?;
        self.write("extract_comments", batch)
    }

    pub fn channels(&mut self, channels: &[Channel]) -> Result<()> {
        let updated: Vec<String> = channels.iter().map(|c| c.updated_at.to_rfc3339()).collect();
        let batch = record_batch(
            "transform_channels",
            vec![
                utf8("channel_id", channels.iter().map(|c| Some(c.channel_id.as_str()))),
                utf8("channel_name", channels.iter().map(|c| Some(c.channel_name.as_str()))),
                int64("views", channels.iter().map(|c| c.view_count)),
                int64("total_videos", channels.iter().map(|c| c.video_count)),
                int64("subscribers", channels.iter().map(|c| c.subscriber_count)),
                utf8("updated_at", updated.iter().map(|u| Some(u.as_str()))),
            ],
        )?;
        self.write("transform_channels", batch)
    }

    pub fn videos(&mut self, videos: &[Video]) -> Result<()> {
        let published = timestamps(videos.iter().map(|v| v.published_at));
        let batch = record_batch(
            "transform_videos",
            vec![
                utf8("video_id", videos.iter().map(|v| Some(v.video_id.as_str()))),
                utf8("channel_id", videos.iter().map(|v| Some(v.channel_id.as_str()))),
                utf8("channel_name", videos.iter().map(|v| Some(v.channel_name.as_str()))),
                utf8("title", videos.iter().map(|v| Some(v.title.as_str()))),
                utf8("published_at", published.iter().map(|p| p.as_deref())),
                int64("duration", videos.iter().map(|v| v.duration_seconds)),
                int64("view_count", videos.iter().map(|v| v.view_count)),
                int64("like_count", videos.iter().map(|v| v.like_count)),
                int64("comment_count", videos.iter().map(|v| v.comment_count)),
            ],
        )?;
        self.write("transform_videos", batch)
    }

    pub fn comments(&mut self, comments: &[Comment]) -> Result<()> {
        let published = timestamps(comments.iter().map(|c| c.published_at));
        let batch = record_batch(
            "transform_comments",
            vec![
                utf8("comment_id", comments.iter().map(|c| Some(c.comment_id.as_str()))),
                utf8("video_id", comments.iter().map(|c| Some(c.video_id.as_str()))),
                utf8("channel_id", comments.iter().map(|c| Some(c.channel_id.as_str()))),
                utf8("comment_text", comments.iter().map(|c| Some(c.comment_text.as_str()))),
                utf8("published_at", published.iter().map(|p| p.as_deref())),
                (
                    ArrowField::new("vader_score", DataType::Float64, false),
                    Arc::new(Float64Array::from(
                        comments.iter().map(|c| c.sentiment_score).collect::<Vec<_>>(),
                    )) as ArrayRef,
                ),
                utf8("vader_sentiment", comments.iter().map(|c| Some(c.sentiment.as_str()))),
            ],
        )?;
        self.write("transform_comments", batch)
    }

    /// Write `manifest.json` and `run_summary.json`; returns the manifest path.
    pub fn finish(self, summary: &RunSummary) -> Result<PathBuf> {
        let manifest = ParquetManifest {
            schema_version: 1,
            run_id: self.run_id,
            files: self.files,
        };
        let manifest_path = self.dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
        fs::write(&manifest_path, bytes)
            .with_context(|| format!("writing {}", manifest_path.display()))?;

        let summary_path = self.dir.join("run_summary.json");
        let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
        fs::write(&summary_path, bytes)
            .with_context(|| format!("writing {}", summary_path.display()))?;

        Ok(manifest_path)
    }

    fn write(&mut self, name: &str, batch: RecordBatch) -> Result<()> {
        let path = self.dir.join(format!("{name}.parquet"));
        write_parquet(&path, &batch)?;
        self.files.push(manifest_entry(name, &self.dir, &path, batch.num_rows())?);
        Ok(())
    }
}

fn utf8<'a>(name: &str, values: impl Iterator<Item = Option<&'a str>>) -> (ArrowField, ArrayRef) {
    let values: Vec<Option<&str>> = values.collect();
    let nullable = values.iter().any(Option::is_none);
    (
        ArrowField::new(name, DataType::Utf8, nullable),
        Arc::new(StringArray::from(values)) as ArrayRef,
    )
}

fn int64(name: &str, values: impl Iterator<Item = i64>) -> (ArrowField, ArrayRef) {
    (
        ArrowField::new(name, DataType::Int64, false),
        Arc::new(Int64Array::from(values.collect::<Vec<_>>())) as ArrayRef,
    )
}

fn timestamps(values: impl Iterator<Item = Option<DateTime<Utc>>>) -> Vec<Option<String>> {
    values.map(|ts| ts.map(|ts| ts.to_rfc3339())).collect()
}

fn raw_duration_text(raw: &RawDuration) -> Option<String> {
    match raw {
        RawDuration::Seconds(secs) => Some(secs.to_string()),
        RawDuration::Text(text) => Some(text.clone()),
        RawDuration::Missing => None,
    }
}

fn record_batch(label: &str, columns: Vec<(ArrowField, ArrayRef)>) -> Result<RecordBatch> {
    let (fields, arrays): (Vec<_>, Vec<_>) = columns.into_iter().unzip();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .with_context(|| format!("building {label} record batch"))
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, dir: &Path, path: &Path, rows: usize) -> Result<ParquetManifestFile> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let rel = path.strip_prefix(dir).unwrap_or(path).display().to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: hex::encode(hasher.finalize()),
        bytes: bytes.len() as u64,
        rows,
    })
}
