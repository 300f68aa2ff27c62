//! Rolling back the change records of one source file

use crate::db::{bad_lines, changes, files, voters};
use crate::diff::replay;
use crate::models::FileStatus;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

/// What a rollback removed and rebuilt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackStats {
    pub changes_removed: u64,
    pub voters_rebuilt: u64,
    pub voters_removed: u64,
    pub bad_lines_removed: u64,
}

/// Remove every change record written for `file_id`, rebuild the state of
/// each voter it touched, and cancel the file.
///
/// Only the most recent file with changes can be rolled back, since later
/// MODIFY records are diffs against the state this file produced.
pub async fn remove_changes(pool: &SqlitePool, file_id: i64) -> Result<RollbackStats> {
    let mut tx = pool.begin().await.context("Failed to begin rollback transaction")?;

    let file = files::find(&mut *tx, file_id)
        .await?
        .with_context(|| format!("Source file {} not found", file_id))?;

    if file.file_status == FileStatus::Processing {
        anyhow::bail!("Source file {} is being processed", file_id);
    }

    match changes::latest_file_id(&mut *tx).await? {
        Some(latest) if latest != file_id => {
            anyhow::bail!(
                "Only the latest changed file can be rolled back (file {}, not {})",
                latest,
                file_id
            );
        }
        _ => {}
    }

    let touched = changes::voter_ids_for_file(&mut *tx, file_id).await?;
    let mut stats = RollbackStats {
        changes_removed: changes::delete_for_file(&mut *tx, file_id).await?,
        ..Default::default()
    };

    for voter_id in touched {
        let remaining = changes::for_voter(&mut *tx, voter_id).await?;
        if remaining.is_empty() {
            voters::delete(&mut *tx, voter_id).await?;
            stats.voters_removed += 1;
        } else {
            voters::set_data(&mut *tx, voter_id, Some(&replay(&remaining))).await?;
            stats.voters_rebuilt += 1;
        }
    }

    stats.bad_lines_removed = bad_lines::delete_for_filename(&mut *tx, &file.filename).await?;
    files::set_status(&mut *tx, file_id, FileStatus::Cancelled).await?;

    tx.commit().await.context("Failed to commit rollback")?;

    info!(
        file_id,
        filename = %file.filename,
        changes_removed = stats.changes_removed,
        voters_rebuilt = stats.voters_rebuilt,
        voters_removed = stats.voters_removed,
        bad_lines_removed = stats.bad_lines_removed,
        "Rolled back source file"
    );
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::changes::NewChange;
    use crate::db::connect_in_memory;
    use crate::models::{DataFileKind, OpCode};
    use chrono::{TimeZone, Utc};
    use ncvoter_common::{FieldValue, RowData};

    fn row(pairs: &[(&str, &str)]) -> RowData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
            .collect()
    }

    async fn record(
        pool: &SqlitePool,
        voter_id: i64,
        file_id: i64,
        op_code: OpCode,
        day: u32,
        data: RowData,
    ) {
        let mut conn = pool.acquire().await.unwrap();
        changes::insert_many(
            &mut conn,
            &[NewChange {
                voter_id,
                op_code,
                md5_hash: format!("h{}-{}", file_id, voter_id),
                snapshot_dt: Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap(),
                file_id,
                file_lineno: 1,
                data,
            }],
        )
        .await
        .unwrap();
    }

    async fn insert_voter(pool: &SqlitePool, ncid: &str, data: &RowData) -> i64 {
        sqlx::query_scalar("INSERT INTO voters (ncid, data, deleted) VALUES (?1, ?2, 0) RETURNING id")
            .bind(ncid)
            .bind(sqlx::types::Json(data))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rollback_latest_file() {
        let pool = connect_in_memory().await.unwrap();
        let day1 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        let f1 = files::insert(&pool, "e1", "/s1.txt", DataFileKind::NCVoter, day1).await.unwrap();
        let f2 = files::insert(&pool, "e2", "/s2.txt", DataFileKind::NCVoter, day2).await.unwrap();

        let a1 = row(&[("ncid", "A1"), ("last_name", "LAMBERT")]);
        let a1_id = insert_voter(&pool, "A1", &row(&[("ncid", "A1"), ("last_name", "LANGSTON")])).await;
        record(&pool, a1_id, f1, OpCode::Add, 1, a1.clone()).await;
        record(&pool, a1_id, f2, OpCode::Modify, 2, row(&[("last_name", "LANGSTON")])).await;

        let b2 = row(&[("ncid", "B2")]);
        let b2_id = insert_voter(&pool, "B2", &b2).await;
        record(&pool, b2_id, f2, OpCode::Add, 2, b2).await;

        // Earlier file is refused
        assert!(remove_changes(&pool, f1).await.is_err());

        let stats = remove_changes(&pool, f2).await.unwrap();
        assert_eq!(stats.changes_removed, 2);
        assert_eq!(stats.voters_rebuilt, 1);
        assert_eq!(stats.voters_removed, 1);

        assert_eq!(voters::current_state(&pool, "A1").await.unwrap(), Some(a1));
        assert!(voters::find_by_ncid(&pool, "B2").await.unwrap().is_none());
        let f2 = files::find(&pool, f2).await.unwrap().unwrap();
        assert_eq!(f2.file_status, FileStatus::Cancelled);

        // Now the first file is the latest
        remove_changes(&pool, f1).await.unwrap();
        assert_eq!(voters::count(&pool).await.unwrap(), 0);
    }
}
