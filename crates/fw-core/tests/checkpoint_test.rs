use fw_core::checkpoint::CheckpointStore;
use fw_core::db::Database;

#[tokio::test]
async fn absent_until_first_advance() {
    let db = Database::open_in_memory().await.unwrap();
    let store = CheckpointStore::new(&db);
    assert!(store.get(1).await.unwrap().is_none());

    assert!(store.advance(1, 42, false).await);
    let cp = store.get(1).await.unwrap().expect("checkpoint should exist");
    assert_eq!(cp.last_event_id, 42);
    assert!(cp.last_full_scan_at.is_none());
}

#[tokio::test]
async fn never_regresses() {
    let db = Database::open_in_memory().await.unwrap();
    let store = CheckpointStore::new(&db);

    assert!(store.advance(1, 500, false).await);
    assert!(store.advance(1, 120, false).await);
    assert_eq!(store.get(1).await.unwrap().unwrap().last_event_id, 500);

    assert!(store.advance(1, 501, false).await);
    assert_eq!(store.get(1).await.unwrap().unwrap().last_event_id, 501);
}

#[tokio::test]
async fn negative_target_is_clamped_to_zero() {
    let db = Database::open_in_memory().await.unwrap();
    let store = CheckpointStore::new(&db);
    assert!(store.advance(3, -5, false).await);
    assert_eq!(store.get(3).await.unwrap().unwrap().last_event_id, 0);
}

#[tokio::test]
async fn full_scan_stamp_is_kept_by_later_incremental_advances() {
    let db = Database::open_in_memory().await.unwrap();
    let store = CheckpointStore::new(&db);

    assert!(store.advance(1, 0, true).await);
    let stamped = store.get(1).await.unwrap().unwrap().last_full_scan_at;
    assert!(stamped.is_some());

    assert!(store.advance(1, 10, false).await);
    let cp = store.get(1).await.unwrap().unwrap();
    assert_eq!(cp.last_full_scan_at, stamped);
    assert_eq!(cp.last_event_id, 10);
}

#[tokio::test]
async fn users_are_independent() {
    let db = Database::open_in_memory().await.unwrap();
    let store = CheckpointStore::new(&db);
    store.advance(1, 10, false).await;
    store.advance(2, 20, false).await;
    assert_eq!(store.get(1).await.unwrap().unwrap().last_event_id, 10);
    assert_eq!(store.get(2).await.unwrap().unwrap().last_event_id, 20);
}

#[tokio::test]
async fn write_failure_returns_false() {
    let db = Database::open_in_memory().await.unwrap();
    let store = CheckpointStore::new(&db);
    db.connection()
        .call(|conn| {
            conn.execute_batch("DROP TABLE organize_checkpoints")?;
            Ok(())
        })
        .await
        .unwrap();
    assert!(!store.advance(1, 5, false).await);
}

#[tokio::test]
async fn persists_in_a_file_backed_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("fw.db");
    {
        let db = Database::open(&path).await.unwrap();
        assert!(CheckpointStore::new(&db).advance(9, 77, true).await);
    }
    let db = Database::open(&path).await.unwrap();
    let cp = CheckpointStore::new(&db).get(9).await.unwrap().unwrap();
    assert_eq!(cp.last_event_id, 77);
    assert!(cp.last_full_scan_at.is_some());
}
