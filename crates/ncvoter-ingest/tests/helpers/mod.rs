//! Shared fixtures for the ingestion integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, TimeZone, Utc};
use ncvoter_common::checksum::compute_file_md5;
use ncvoter_ingest::config::IngestConfig;
use ncvoter_ingest::db::{self, files};
use ncvoter_ingest::models::{DataFileKind, SourceFile};
use ncvoter_ingest::IngestPipeline;
use sqlx::SqlitePool;
use std::fmt;
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

static TRACING: Once = Once::new();

/// Route pipeline logs through the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("ncvoter_ingest=debug,sqlx=warn")
            .with_test_writer()
            .try_init();
    });
}

pub fn day(year: i32, month: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, d, 0, 0, 0).unwrap()
}

/// Cancels a token when an event with the given message is logged, to
/// interrupt a run at a known point
pub struct CancelOnEvent {
    pub message: &'static str,
    pub token: CancellationToken,
}

struct MessageMatch<'a> {
    expected: &'a str,
    found: bool,
}

impl Visit for MessageMatch<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" && format!("{:?}", value) == self.expected {
            self.found = true;
        }
    }
}

impl<S: Subscriber> Layer<S> for CancelOnEvent {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageMatch {
            expected: self.message,
            found: false,
        };
        event.record(&mut visitor);
        if visitor.found {
            self.token.cancel();
        }
    }
}

/// A scratch directory plus a fresh in-memory database
pub struct Fixture {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

impl Fixture {
    pub async fn new() -> Self {
        init_tracing();
        Self {
            dir: tempfile::tempdir().unwrap(),
            pool: db::connect_in_memory().await.unwrap(),
        }
    }

    /// Write a tab-delimited snapshot in the legacy single-byte encoding
    pub fn write_snapshot(&self, name: &str, header: &[&str], rows: &[&[&str]]) -> PathBuf {
        let mut text = header.join("\t");
        text.push('\n');
        for row in rows {
            text.push_str(&row.join("\t"));
            text.push('\n');
        }
        let path = self.dir.path().join(name);
        let bytes: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Write raw lines verbatim, for malformed input
    pub fn write_lines(&self, name: &str, lines: &[String]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    /// Write a snapshot as UTF-16LE with a byte-order mark
    pub fn write_utf16_snapshot(&self, name: &str, header: &[&str], rows: &[&[&str]]) -> PathBuf {
        let mut text = header.join("\t");
        text.push_str("\r\n");
        for row in rows {
            text.push_str(&row.join("\t"));
            text.push_str("\r\n");
        }
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Register a file as an UNPROCESSED job with the given declared date
    pub async fn register(&self, path: &PathBuf, created: DateTime<Utc>) -> SourceFile {
        let etag = compute_file_md5(path).unwrap();
        let id = files::insert(
            &self.pool,
            &etag,
            &path.to_string_lossy(),
            DataFileKind::NCVoter,
            created,
        )
        .await
        .unwrap();
        self.file(id).await
    }

    pub async fn file(&self, id: i64) -> SourceFile {
        files::find(&self.pool, id).await.unwrap().unwrap()
    }

    /// Pipeline with a small batch so tests cross flush boundaries
    pub fn pipeline(&self) -> IngestPipeline {
        let config = IngestConfig {
            batch_size: 2,
            ..IngestConfig::default()
        };
        IngestPipeline::new(self.pool.clone(), config).quiet(true)
    }
}
