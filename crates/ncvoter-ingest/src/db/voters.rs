//! Queries over `voters`, plus the read contract used by downstream consumers

use crate::db::changes;
use crate::diff::replay;
use crate::models::{ChangeRecord, Voter};
use anyhow::{Context, Result};
use ncvoter_common::RowData;
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};

/// Rows per statement when loading identifiers into the sweep table
const SEEN_CHUNK: usize = 400;

pub async fn find_by_ncid(exec: impl SqliteExecutor<'_>, ncid: &str) -> Result<Option<Voter>> {
    sqlx::query_as::<_, Voter>("SELECT id, ncid, data, deleted FROM voters WHERE ncid = ?1")
        .bind(ncid)
        .fetch_optional(exec)
        .await
        .with_context(|| format!("Failed to look up voter {}", ncid))
}

pub async fn count(exec: impl SqliteExecutor<'_>) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM voters")
        .fetch_one(exec)
        .await
        .context("Failed to count voters")
}

pub async fn set_data(exec: impl SqliteExecutor<'_>, voter_id: i64, data: Option<&RowData>) -> Result<()> {
    sqlx::query("UPDATE voters SET data = ?1 WHERE id = ?2")
        .bind(data.map(Json))
        .bind(voter_id)
        .execute(exec)
        .await
        .with_context(|| format!("Failed to update state of voter {}", voter_id))?;
    Ok(())
}

pub async fn delete(exec: impl SqliteExecutor<'_>, voter_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM voters WHERE id = ?1")
        .bind(voter_id)
        .execute(exec)
        .await
        .with_context(|| format!("Failed to delete voter {}", voter_id))?;
    Ok(())
}

/// Flattened current state of a registrant.
///
/// Uses the stored state when present and falls back to replaying the
/// change log otherwise. `None` when the identifier is unknown.
pub async fn current_state(pool: &SqlitePool, ncid: &str) -> Result<Option<RowData>> {
    let Some(voter) = find_by_ncid(pool, ncid).await? else {
        return Ok(None);
    };
    match voter.data {
        Some(data) => Ok(Some(data)),
        None => {
            let log = changes::for_voter(pool, voter.id).await?;
            Ok(Some(replay(&log)))
        }
    }
}

/// Ordered diffs of a registrant, in replay order
pub async fn changelog(pool: &SqlitePool, ncid: &str) -> Result<Vec<ChangeRecord>> {
    match find_by_ncid(pool, ncid).await? {
        Some(voter) => changes::for_voter(pool, voter.id).await,
        None => Ok(Vec::new()),
    }
}

/// Counts from one presence sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub deleted: u64,
    pub undeleted: u64,
}

/// Mark registrants missing from `seen` as deleted and undelete the ones
/// that reappeared. Runs on the caller's connection so it can share a
/// transaction.
pub async fn sweep_presence<'a>(
    conn: &mut SqliteConnection,
    seen: impl IntoIterator<Item = &'a String>,
) -> Result<SweepResult> {
    sqlx::query("CREATE TEMP TABLE IF NOT EXISTS seen_ncids (ncid TEXT PRIMARY KEY)")
        .execute(&mut *conn)
        .await
        .context("Failed to create presence table")?;
    sqlx::query("DELETE FROM seen_ncids")
        .execute(&mut *conn)
        .await
        .context("Failed to clear presence table")?;

    let seen: Vec<&String> = seen.into_iter().collect();
    for chunk in seen.chunks(SEEN_CHUNK) {
        let mut builder = sqlx::QueryBuilder::new("INSERT OR IGNORE INTO seen_ncids (ncid) ");
        builder.push_values(chunk, |mut b, ncid| {
            b.push_bind(ncid.as_str());
        });
        builder
            .build()
            .execute(&mut *conn)
            .await
            .context("Failed to load seen identifiers")?;
    }

    let deleted = sqlx::query(
        "UPDATE voters SET deleted = 1 WHERE deleted = 0 AND ncid NOT IN (SELECT ncid FROM seen_ncids)",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to mark absent voters deleted")?
    .rows_affected();

    let undeleted = sqlx::query(
        "UPDATE voters SET deleted = 0 WHERE deleted = 1 AND ncid IN (SELECT ncid FROM seen_ncids)",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to undelete returning voters")?
    .rows_affected();

    sqlx::query("DROP TABLE seen_ncids")
        .execute(&mut *conn)
        .await
        .context("Failed to drop presence table")?;

    Ok(SweepResult { deleted, undeleted })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    async fn insert_voter(pool: &SqlitePool, ncid: &str, deleted: bool) -> i64 {
        sqlx::query_scalar("INSERT INTO voters (ncid, deleted) VALUES (?1, ?2) RETURNING id")
            .bind(ncid)
            .bind(deleted)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_presence() {
        let pool = connect_in_memory().await.unwrap();
        insert_voter(&pool, "A1", false).await;
        insert_voter(&pool, "A2", false).await;
        insert_voter(&pool, "A3", true).await;

        let seen = vec!["A1".to_string(), "A3".to_string()];
        let mut conn = pool.acquire().await.unwrap();
        let result = sweep_presence(&mut conn, &seen).await.unwrap();
        drop(conn);

        assert_eq!(result, SweepResult { deleted: 1, undeleted: 1 });
        assert!(find_by_ncid(&pool, "A2").await.unwrap().unwrap().deleted);
        assert!(!find_by_ncid(&pool, "A3").await.unwrap().unwrap().deleted);
        assert!(!find_by_ncid(&pool, "A1").await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_unknown_voter_has_no_state() {
        let pool = connect_in_memory().await.unwrap();
        assert!(current_state(&pool, "ZZ9").await.unwrap().is_none());
        assert!(changelog(&pool, "ZZ9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_data() {
        let pool = connect_in_memory().await.unwrap();
        let id = insert_voter(&pool, "A1", false).await;

        let mut data = RowData::new();
        data.insert("ncid".into(), "A1".into());
        set_data(&pool, id, Some(&data)).await.unwrap();

        assert_eq!(current_state(&pool, "A1").await.unwrap(), Some(data));
    }
}
