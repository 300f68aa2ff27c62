//! Rolling back a processed file and registering it again
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

use helpers::{day, Fixture};
use ncvoter_common::FieldValue;
use ncvoter_ingest::db::{bad_lines, changes, voters};
use ncvoter_ingest::diff::replay;
use ncvoter_ingest::models::{DataFileKind, FileStatus};
use ncvoter_ingest::registry::{add_files, Registration};
use ncvoter_ingest::rollback::remove_changes;

const HEADER: &[&str] = &["ncid", "first_name", "last_name"];

#[tokio::test]
async fn test_rollback_restores_previous_state() {
    let fx = Fixture::new().await;
    let s1 = fx.write_snapshot("s1.txt", HEADER, &[&["A1", "MARY", "LAMBERT"]]);
    let s2 = fx.write_snapshot(
        "s2.txt",
        HEADER,
        &[&["A1", "MARY", "LANGSTON"], &["B2", "JOHN", "SMITH"], &["C3"]],
    );
    let f1 = fx.register(&s1, day(2020, 1, 1)).await;
    let f2 = fx.register(&s2, day(2020, 2, 1)).await;
    fx.pipeline().process_files(false).await.unwrap();
    assert_eq!(bad_lines::list(&fx.pool, Some(&f2.filename)).await.unwrap().len(), 1);

    // Rolling back the older file first would orphan later diffs
    assert!(remove_changes(&fx.pool, f1.id).await.is_err());

    let stats = remove_changes(&fx.pool, f2.id).await.unwrap();
    assert_eq!(stats.changes_removed, 2);
    assert_eq!(stats.voters_rebuilt, 1);
    assert_eq!(stats.voters_removed, 1);
    assert_eq!(stats.bad_lines_removed, 1);

    let state = voters::current_state(&fx.pool, "A1").await.unwrap().unwrap();
    assert_eq!(state["last_name"], FieldValue::from("LAMBERT"));
    assert_eq!(replay(&voters::changelog(&fx.pool, "A1").await.unwrap()), state);
    assert!(voters::find_by_ncid(&fx.pool, "B2").await.unwrap().is_none());
    assert_eq!(changes::count_for_file(&fx.pool, f2.id).await.unwrap(), 0);
    assert_eq!(fx.file(f2.id).await.file_status, FileStatus::Cancelled);
}

#[tokio::test]
async fn test_reset_requeues_rolled_back_file() {
    let fx = Fixture::new().await;
    let s1 = fx.write_snapshot("ncvoter_20200101.txt", HEADER, &[&["A1", "MARY", "LAMBERT"]]);
    let s2 = fx.write_snapshot("ncvoter_20200201.txt", HEADER, &[&["A1", "MARY", "LANGSTON"]]);

    let registered = add_files(&fx.pool, &[fx.dir.path().to_path_buf()], DataFileKind::NCVoter, false)
        .await
        .unwrap();
    assert_eq!(registered.len(), 2);
    let Registration::Added(second) = registered[1].outcome else {
        panic!("unexpected {:?}", registered[1].outcome);
    };
    assert_eq!(registered[1].path, std::fs::canonicalize(&s2).unwrap());

    fx.pipeline().process_files(false).await.unwrap();
    remove_changes(&fx.pool, second).await.unwrap();

    // Without --reset the known content is skipped
    let again = add_files(&fx.pool, &[s2.clone()], DataFileKind::NCVoter, false)
        .await
        .unwrap();
    assert_eq!(again[0].outcome, Registration::Skipped(second));

    let again = add_files(&fx.pool, &[s1, s2], DataFileKind::NCVoter, true)
        .await
        .unwrap();
    assert!(again
        .iter()
        .all(|r| matches!(r.outcome, Registration::Requeued(_))));

    // The first file is skipped under its checkpoint, the second records its MODIFY again
    let outcome = fx.pipeline().process_files(false).await.unwrap();
    assert_eq!(outcome.files(), 2);
    assert_eq!(outcome.stats().modified, 1);

    let state = voters::current_state(&fx.pool, "A1").await.unwrap().unwrap();
    assert_eq!(state["last_name"], FieldValue::from("LANGSTON"));
    assert_eq!(voters::changelog(&fx.pool, "A1").await.unwrap().len(), 2);
}
