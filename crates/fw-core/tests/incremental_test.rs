use fw_core::checkpoint::CheckpointStore;
use fw_core::db::Database;
use fw_core::event_log::EventLog;
use fw_core::incremental::{IncrementalLoader, NO_CHANGES_SUMMARY};
use fw_core::types::*;

struct Fixture {
    log: EventLog,
    checkpoints: CheckpointStore,
    loader: IncrementalLoader,
}

async fn fixture() -> Fixture {
    let db = Database::open_in_memory().await.unwrap();
    let log = EventLog::new(&db);
    let checkpoints = CheckpointStore::new(&db);
    let loader = IncrementalLoader::new(log.clone(), checkpoints.clone());
    Fixture {
        log,
        checkpoints,
        loader,
    }
}

async fn append_file_creates(log: &EventLog, user_id: UserId, count: i64) {
    let batch = (1..=count)
        .map(|i| {
            NewChangeEvent::new(EntityType::File, i, ChangeAction::Create)
                .with_parents(None, Some(1))
                .with_names(None, Some(format!("file-{i}")))
        })
        .collect();
    assert_eq!(log.append_batch(user_id, batch).await, count as usize);
}

#[tokio::test]
async fn no_events_no_checkpoint() {
    let f = fixture().await;
    let ctx = f.loader.load(1, 200).await.unwrap();
    assert!(!ctx.has_changes);
    assert!(!ctx.has_checkpoint);
    assert_eq!(ctx.target_event_id, 0);
    assert_eq!(ctx.summary_text, NO_CHANGES_SUMMARY);
    assert!(ctx.events.is_empty());
}

#[tokio::test]
async fn overflow_depends_on_the_ceiling() {
    let f = fixture().await;
    append_file_creates(&f.log, 1, 350).await;
    assert!(f.checkpoints.advance(1, 100, false).await);

    let tight = f.loader.load(1, 200).await.unwrap();
    assert!(tight.has_changes);
    assert!(tight.overflow);
    assert_eq!(tight.checkpoint_event_id, 100);
    assert_eq!(tight.target_event_id, 350);
    assert_eq!(tight.total_events, 250);
    assert_eq!(tight.events.len(), 200);
    assert_eq!(tight.events[0].id, 101);

    let roomy = f.loader.load(1, 300).await.unwrap();
    assert!(!roomy.overflow);
    assert_eq!(roomy.events.len(), 250);
    assert!(roomy.summary_text.contains("Event range: (100, 350]"));
    assert!(roomy.summary_text.contains("Total events: 250"));
}

#[tokio::test]
async fn caught_up_checkpoint_has_no_changes() {
    let f = fixture().await;
    append_file_creates(&f.log, 1, 5).await;
    assert!(f.checkpoints.advance(1, 5, false).await);

    let ctx = f.loader.load(1, 200).await.unwrap();
    assert!(!ctx.has_changes);
    assert!(ctx.has_checkpoint);
    assert_eq!(ctx.checkpoint_event_id, 5);
    assert_eq!(ctx.target_event_id, 5);
    assert!(ctx.changed_file_ids.is_empty());
}

#[tokio::test]
async fn zero_ceiling_is_clamped_to_one() {
    let f = fixture().await;
    append_file_creates(&f.log, 1, 3).await;

    let ctx = f.loader.load(1, 0).await.unwrap();
    assert!(ctx.overflow);
    assert_eq!(ctx.events.len(), 1);
    assert_eq!(ctx.total_events, 3);
}

#[tokio::test]
async fn context_carries_summary_scope() {
    let f = fixture().await;
    append_file_creates(&f.log, 1, 3).await;
    let ctx = f.loader.load(1, 200).await.unwrap();

    assert_eq!(ctx.changed_file_ids, vec![1, 2, 3]);
    assert_eq!(ctx.changed_folder_ids, vec![1]);
    assert_eq!(ctx.action_breakdown["file:create"], 3);
    assert!(!ctx.has_checkpoint);
}

#[tokio::test]
async fn other_users_events_are_ignored() {
    let f = fixture().await;
    append_file_creates(&f.log, 2, 4).await;
    let ctx = f.loader.load(1, 200).await.unwrap();
    assert!(!ctx.has_changes);
    assert_eq!(ctx.target_event_id, 0);
}
