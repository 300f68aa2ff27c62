//! Persistent records of the ingestion store
//!
//! Maps to the `source_files`, `voters`, `change_records` and `bad_lines`
//! tables created by the migrations in `migrations/`.

use chrono::{DateTime, Utc};
use ncvoter_common::RowData;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};
use std::path::Path;

/// Kind of change recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    /// First sighting of a registrant; payload is the full row
    Add,
    /// Payload is a delta against the replayed state
    Modify,
}

impl OpCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpCode::Add => "A",
            OpCode::Modify => "M",
        }
    }
}

impl From<String> for OpCode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "A" => OpCode::Add,
            _ => OpCode::Modify,
        }
    }
}

/// Lifecycle of one snapshot ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Unprocessed,
    Processing,
    Processed,
    Cancelled,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Unprocessed => "unprocessed",
            FileStatus::Processing => "processing",
            FileStatus::Processed => "processed",
            FileStatus::Cancelled => "cancelled",
        }
    }
}

impl From<String> for FileStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => FileStatus::Processing,
            "processed" => FileStatus::Processed,
            "cancelled" => FileStatus::Cancelled,
            _ => FileStatus::Unprocessed,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which statewide export a file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
pub enum DataFileKind {
    /// Voter registration snapshot
    #[default]
    #[value(name = "ncvoter")]
    NCVoter,
    /// Voter history export
    #[value(name = "ncvhis")]
    NCVHis,
}

impl DataFileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFileKind::NCVoter => "NCVoter",
            DataFileKind::NCVHis => "NCVHis",
        }
    }
}

impl From<String> for DataFileKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "NCVHis" => DataFileKind::NCVHis,
            _ => DataFileKind::NCVoter,
        }
    }
}

/// One registrant (maps to `voters`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voter {
    pub id: i64,
    pub ncid: String,
    /// Flattened current state; `None` until populated from replay
    pub data: Option<RowData>,
    pub deleted: bool,
}

impl<'r> FromRow<'r, SqliteRow> for Voter {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let data: Option<Json<RowData>> = row.try_get("data")?;
        Ok(Self {
            id: row.try_get("id")?,
            ncid: row.try_get("ncid")?,
            data: data.map(|Json(d)| d),
            deleted: row.try_get("deleted")?,
        })
    }
}

/// One append-only diff (maps to `change_records`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub voter_id: i64,
    pub op_code: OpCode,
    pub md5_hash: String,
    pub snapshot_dt: DateTime<Utc>,
    pub file_id: i64,
    pub file_lineno: i64,
    pub data: RowData,
}

impl<'r> FromRow<'r, SqliteRow> for ChangeRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let op_code: String = row.try_get("op_code")?;
        let Json(data): Json<RowData> = row.try_get("data")?;
        Ok(Self {
            id: row.try_get("id")?,
            voter_id: row.try_get("voter_id")?,
            op_code: OpCode::from(op_code),
            md5_hash: row.try_get("md5_hash")?,
            snapshot_dt: row.try_get("snapshot_dt")?,
            file_id: row.try_get("file_id")?,
            file_lineno: row.try_get("file_lineno")?,
            data,
        })
    }
}

/// One registered snapshot file and its job status (maps to `source_files`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: i64,
    /// MD5 of the file contents
    pub etag: String,
    pub filename: String,
    pub data_file_kind: DataFileKind,
    /// Declared snapshot date; fallback timestamp for rows without one
    pub created: DateTime<Utc>,
    pub file_status: FileStatus,
}

impl SourceFile {
    /// Base name of the stored path, for logs and reports
    pub fn short_filename(&self) -> String {
        Path::new(&self.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filename.clone())
    }
}

impl<'r> FromRow<'r, SqliteRow> for SourceFile {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("data_file_kind")?;
        let status: String = row.try_get("file_status")?;
        Ok(Self {
            id: row.try_get("id")?,
            etag: row.try_get("etag")?,
            filename: row.try_get("filename")?,
            data_file_kind: DataFileKind::from(kind),
            created: row.try_get("created")?,
            file_status: FileStatus::from(status),
        })
    }
}

/// A contiguous run of malformed or repaired lines (maps to `bad_lines`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadLineRange {
    /// Set once the range has been written
    pub id: Option<i64>,
    pub filename: String,
    pub first_line_no: i64,
    pub last_line_no: i64,
    pub example_line: String,
    pub message: String,
    /// Repaired and still processed, as opposed to skipped
    pub is_warning: bool,
}

impl BadLineRange {
    pub fn len(&self) -> i64 {
        self.last_line_no - self.first_line_no + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }
}

impl<'r> FromRow<'r, SqliteRow> for BadLineRange {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            first_line_no: row.try_get("first_line_no")?,
            last_line_no: row.try_get("last_line_no")?,
            example_line: row.try_get("example_line")?,
            message: row.try_get("message")?,
            is_warning: row.try_get("is_warning")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            FileStatus::Unprocessed,
            FileStatus::Processing,
            FileStatus::Processed,
            FileStatus::Cancelled,
        ] {
            assert_eq!(FileStatus::from(status.as_str().to_string()), status);
        }
        assert_eq!(OpCode::from("A".to_string()), OpCode::Add);
        assert_eq!(OpCode::from("M".to_string()), OpCode::Modify);
    }

    #[test]
    fn test_short_filename() {
        let file = SourceFile {
            id: 1,
            etag: "abc".into(),
            filename: "/data/snapshots/ncvoter_Statewide_20240101.txt".into(),
            data_file_kind: DataFileKind::NCVoter,
            created: Utc::now(),
            file_status: FileStatus::Unprocessed,
        };
        assert_eq!(file.short_filename(), "ncvoter_Statewide_20240101.txt");
    }

    #[test]
    fn test_bad_line_range_len() {
        let range = BadLineRange {
            id: None,
            filename: "f".into(),
            first_line_no: 4,
            last_line_no: 7,
            example_line: String::new(),
            message: "Less cells".into(),
            is_warning: false,
        };
        assert_eq!(range.len(), 4);
    }
}
