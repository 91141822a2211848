use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fw_core::checkpoint::CheckpointStore;
use fw_core::config::ReconcileConfig;
use fw_core::db::Database;
use fw_core::event_log::EventLog;
use fw_core::incremental::IncrementalLoader;
use fw_core::tree::TreeStore;
use fw_core::types::NewFile;
use fw_daemon::notify::InboxSink;
use fw_daemon::plan::{Plan, PlanReason, ScanMode};
use fw_daemon::reconciler::{Outcome, Reconciler};
use fw_daemon::state_machine::ReconcileState;
use fw_harness::admission::{AdmissionLock, LockState};
use fw_harness::capabilities::{CapabilityHost, TokenUsage, ToolCall};
use fw_harness::kv::MemoryKv;
use fw_harness::policy::{
    ExecutionOutcome, ExecutionRequest, PolicyError, PolicyExecutor, RuleExecutor, ScriptedExecutor,
};
use fw_harness::queue::TaskQueue;
use serde_json::json;

struct Fixture {
    db: Database,
    tree: TreeStore,
    events: EventLog,
    checkpoints: CheckpointStore,
    inbox: Arc<InboxSink>,
}

impl Fixture {
    async fn new() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let events = EventLog::new(&db);
        Self {
            tree: TreeStore::new(&db, events.clone()),
            checkpoints: CheckpointStore::new(&db),
            events,
            inbox: Arc::new(InboxSink::new(50)),
            db,
        }
    }

    fn reconciler(&self, executor: Arc<dyn PolicyExecutor>) -> Reconciler {
        self.reconciler_with(executor, ReconcileConfig::default())
    }

    fn reconciler_with(&self, executor: Arc<dyn PolicyExecutor>, config: ReconcileConfig) -> Reconciler {
        Reconciler::new(&self.db, executor, self.inbox.clone(), config)
    }

    /// Docs/report.pdf: satisfies both invariants. Two events.
    async fn clean_tree(&self, user_id: i64) -> i64 {
        let docs = self.tree.create_folder(user_id, "Docs", None).await.unwrap();
        self.tree
            .create_file(user_id, NewFile::named("report.pdf", Some(docs.id)))
            .await
            .unwrap();
        docs.id
    }
}

#[tokio::test]
async fn quiet_tree_without_checkpoint_bootstraps_with_full_scan() {
    let f = Fixture::new().await;
    let executor = Arc::new(ScriptedExecutor::new());
    let report = f.reconciler(executor.clone()).run(1).await;

    assert_eq!(report.outcome, Outcome::Committed);
    assert_eq!(
        report.plan,
        Some(Plan::Run {
            mode: ScanMode::FullScan,
            reason: PlanReason::Bootstrap
        })
    );
    assert_eq!(executor.invocations(), 1);
    assert!(executor.requests()[0].brief.contains("survey the whole tree"));

    let cp = f.checkpoints.get(1).await.unwrap().unwrap();
    assert_eq!(cp.last_event_id, 0);
    assert!(cp.last_full_scan_at.is_some());
    assert_eq!(report.final_state(), Some(ReconcileState::Done));
}

#[tokio::test]
async fn nothing_pending_is_an_idempotent_noop() {
    let f = Fixture::new().await;
    assert!(f.checkpoints.advance(1, 500, false).await);
    let executor = Arc::new(ScriptedExecutor::new());
    let reconciler = f.reconciler(executor.clone());

    for _ in 0..2 {
        let report = reconciler.run(1).await;
        assert_eq!(report.outcome, Outcome::NoOp);
        assert_eq!(report.plan, Some(Plan::NoOp));
        assert_eq!(report.attempts, 0);
    }

    assert_eq!(executor.invocations(), 0);
    assert_eq!(f.checkpoints.get(1).await.unwrap().unwrap().last_event_id, 500);

    let notes = f.inbox.list_for(1);
    assert_eq!(notes.len(), 2);
    assert!(notes[0].content.contains("no changes since the last organize checkpoint"));
    assert!(notes[0].content.contains("Mode: noop"));
}

#[tokio::test]
async fn pending_changes_commit_incrementally() {
    let f = Fixture::new().await;
    let docs = f.clean_tree(1).await;
    let executor = Arc::new(ScriptedExecutor::new());
    let report = f.reconciler(executor.clone()).run(1).await;

    assert_eq!(report.outcome, Outcome::Committed);
    assert_eq!(
        report.plan,
        Some(Plan::Run {
            mode: ScanMode::Incremental,
            reason: PlanReason::PendingChanges
        })
    );
    assert_eq!(report.target_event_id, 2);

    let request = &executor.requests()[0];
    assert_eq!(request.session_id, "file_org_1");
    assert_eq!(request.round, 1);
    assert!(request.brief.contains(&format!("Changed folder ids: {docs}")));
    assert!(request.brief.contains("Event range: (0, 2]"));

    assert!(report.checkpoint_advanced);
    let cp = f.checkpoints.get(1).await.unwrap().unwrap();
    assert_eq!(cp.last_event_id, 2);
    assert!(cp.last_full_scan_at.is_none());
    assert!(f.inbox.list_for(1)[0].content.contains("Checkpoint: advanced to event 2"));
}

#[tokio::test]
async fn failed_checkpoint_write_is_reported_as_not_advanced() {
    let f = Fixture::new().await;
    f.clean_tree(1).await;
    f.db.connection()
        .call(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_checkpoints BEFORE INSERT ON organize_checkpoints
                 BEGIN SELECT RAISE(ABORT, 'checkpoint writes disabled'); END;",
            )?;
            Ok(())
        })
        .await
        .unwrap();
    let reconciler = f.reconciler(Arc::new(ScriptedExecutor::new()));

    let report = reconciler.run(1).await;
    assert_eq!(report.outcome, Outcome::Committed);
    assert!(!report.checkpoint_advanced);
    assert!(f.checkpoints.get(1).await.unwrap().is_none());
    let content = &f.inbox.list_for(1)[0].content;
    assert!(content.contains("Checkpoint: not advanced, still at event 0"));

    f.db.connection()
        .call(|conn| {
            conn.execute_batch("DROP TRIGGER reject_checkpoints")?;
            Ok(())
        })
        .await
        .unwrap();

    // The changes are still pending and the next attempt commits them.
    let report = reconciler.run(1).await;
    assert_eq!(
        report.plan,
        Some(Plan::Run {
            mode: ScanMode::Incremental,
            reason: PlanReason::PendingChanges
        })
    );
    assert!(report.checkpoint_advanced);
    assert_eq!(f.checkpoints.get(1).await.unwrap().unwrap().last_event_id, 2);
}

#[tokio::test]
async fn overflow_runs_full_scan_and_stamps_it() {
    let f = Fixture::new().await;
    f.clean_tree(1).await;
    let config = ReconcileConfig {
        max_events: 1,
        ..ReconcileConfig::default()
    };
    let executor = Arc::new(ScriptedExecutor::new());
    let report = f.reconciler_with(executor.clone(), config).run(1).await;

    assert_eq!(
        report.plan,
        Some(Plan::Run {
            mode: ScanMode::FullScan,
            reason: PlanReason::Overflow
        })
    );
    assert!(!executor.requests()[0].brief.contains("Changed folder ids"));
    let cp = f.checkpoints.get(1).await.unwrap().unwrap();
    assert_eq!(cp.last_event_id, 2);
    assert!(cp.last_full_scan_at.is_some());
}

#[tokio::test]
async fn dirty_tree_after_all_rounds_is_abandoned() {
    let f = Fixture::new().await;
    let docs = f.clean_tree(1).await;
    f.tree
        .create_file(1, NewFile::named("loose.txt", None))
        .await
        .unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    let report = f.reconciler(executor.clone()).run(1).await;

    match &report.outcome {
        Outcome::Abandoned { violations } => {
            assert!(violations.contains("ID: 0, Name: <root>"));
            assert!(!violations.contains(&format!("ID: {docs},")));
        }
        other => panic!("expected abandoned, got {other:?}"),
    }
    assert_eq!(report.attempts, 3);
    assert_eq!(executor.invocations(), 3);

    let requests = executor.requests();
    assert!(requests[1]
        .brief
        .starts_with("Organization is not yet complete. Please resolve the following issues:"));
    assert_eq!(requests[2].round, 3);

    assert!(f.checkpoints.get(1).await.unwrap().is_none());
    let notes = f.inbox.list_for(1);
    assert_eq!(notes.len(), 1);
    assert!(notes[0].content.contains("organization incomplete after all attempts"));
    assert!(notes[0].content.contains("Attempts: 3"));
}

#[tokio::test]
async fn corrective_round_fixes_tree_and_commits() {
    let f = Fixture::new().await;
    let docs = f.clean_tree(1).await;
    let loose = f
        .tree
        .create_file(1, NewFile::named("loose.txt", None))
        .await
        .unwrap();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .then_calls_with_usage(vec![], TokenUsage::new(100, 20))
            .then_calls_with_usage(
                vec![ToolCall::new(
                    "move_file",
                    json!({ "file_id": loose.id, "target_folder_id": docs }),
                )],
                TokenUsage::new(50, 5),
            ),
    );
    let report = f.reconciler(executor.clone()).run(1).await;

    assert_eq!(report.outcome, Outcome::Committed);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.usage.total_tokens, 175);
    assert_eq!(report.steps, 1);
    assert!(report.trace.contains("move_file"));
    assert!(report
        .history
        .iter()
        .any(|(from, _, to)| *from == ReconcileState::Validating && *to == ReconcileState::Retrying));

    // The reconciler's own move is not logged as a user change.
    assert_eq!(f.events.latest_event_id(1).await.unwrap(), 3);
    assert_eq!(f.checkpoints.get(1).await.unwrap().unwrap().last_event_id, 3);

    let content = &f.inbox.list_for(1)[0].content;
    assert!(content.contains("Input tokens: 150"));
    assert!(content.contains("Total tokens: 175"));
    assert!(content.contains("Mode: incremental"));
}

#[tokio::test]
async fn rule_executor_cleans_a_messy_tree_in_one_round() {
    let f = Fixture::new().await;
    let docs = f.clean_tree(1).await;
    f.tree.create_folder(1, "Empty", Some(docs)).await.unwrap();
    f.tree
        .create_file(1, NewFile::named("loose.txt", None))
        .await
        .unwrap();

    let report = f.reconciler(Arc::new(RuleExecutor::new())).run(1).await;
    assert_eq!(report.outcome, Outcome::Committed);
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn executor_failure_is_reported_and_releases_the_lock() {
    let f = Fixture::new().await;
    f.clean_tree(1).await;
    let kv = MemoryKv::shared();
    let lock = AdmissionLock::new(
        kv.clone(),
        TaskQueue::new(kv.clone(), "q"),
        "lock",
        Duration::from_secs(60),
    );
    assert!(lock.try_admit(1).await.unwrap());
    assert_eq!(lock.queue().pop(Some(Duration::from_millis(50))).await.unwrap(), Some(1));

    let executor = Arc::new(ScriptedExecutor::new().then_fail("model endpoint down"));
    let report = f
        .reconciler(executor)
        .run_admitted(1, &lock)
        .await
        .unwrap();

    match &report.outcome {
        Outcome::Failed { error } => assert!(error.contains("model endpoint down")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.final_state(), Some(ReconcileState::Done));
    assert!(f.checkpoints.get(1).await.unwrap().is_none());
    assert_eq!(lock.state(1).await.unwrap(), LockState::Absent);
    assert!(lock.try_admit(1).await.unwrap());

    let notes = f.inbox.list_for(1);
    assert_eq!(notes.len(), 1);
    assert!(notes[0].title.contains("has finished"));
    assert!(notes[0].content.contains("task execution failed: executor failed: model endpoint down"));
}

struct PanickingExecutor;

#[async_trait]
impl PolicyExecutor for PanickingExecutor {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn execute(
        &self,
        _request: &ExecutionRequest,
        _host: &CapabilityHost,
    ) -> Result<ExecutionOutcome, PolicyError> {
        panic!("executor blew up");
    }
}

#[tokio::test]
async fn panicking_executor_fails_once_and_releases_the_lock() {
    let f = Fixture::new().await;
    f.clean_tree(1).await;
    let kv = MemoryKv::shared();
    let lock = AdmissionLock::new(
        kv.clone(),
        TaskQueue::new(kv.clone(), "q"),
        "lock",
        Duration::from_secs(60),
    );
    assert!(lock.try_admit(1).await.unwrap());
    assert_eq!(lock.queue().pop(Some(Duration::from_millis(50))).await.unwrap(), Some(1));

    let report = f
        .reconciler(Arc::new(PanickingExecutor))
        .run_admitted(1, &lock)
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Failed {
            error: "attempt panicked".to_string()
        }
    );
    assert!(!report.checkpoint_advanced);
    assert_eq!(report.final_state(), Some(ReconcileState::Done));
    assert_eq!(lock.state(1).await.unwrap(), LockState::Absent);
    assert!(f.checkpoints.get(1).await.unwrap().is_none());

    let notes = f.inbox.list_for(1);
    assert_eq!(notes.len(), 1);
    assert!(notes[0].content.contains("task execution failed: attempt panicked"));
}

/// Simulates the user adding a file while the executor is busy.
struct ConcurrentUserEdit {
    tree: TreeStore,
    folder: i64,
}

#[async_trait]
impl PolicyExecutor for ConcurrentUserEdit {
    fn name(&self) -> &str {
        "concurrent-edit"
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        _host: &CapabilityHost,
    ) -> Result<ExecutionOutcome, PolicyError> {
        self.tree
            .create_file(request.user_id, NewFile::named("late.txt", Some(self.folder)))
            .await
            .map_err(|e| PolicyError::Failed(e.to_string()))?;
        Ok(ExecutionOutcome::default())
    }
}

#[tokio::test]
async fn events_during_execution_stay_pending() {
    let f = Fixture::new().await;
    let docs = f.clean_tree(1).await;
    let executor = Arc::new(ConcurrentUserEdit {
        tree: f.tree.clone(),
        folder: docs,
    });
    let report = f.reconciler(executor).run(1).await;

    assert_eq!(report.outcome, Outcome::Committed);
    assert_eq!(report.target_event_id, 2);
    assert_eq!(f.checkpoints.get(1).await.unwrap().unwrap().last_event_id, 2);

    let ctx = IncrementalLoader::new(f.events.clone(), f.checkpoints.clone())
        .load(1, 200)
        .await
        .unwrap();
    assert!(ctx.has_changes);
    assert_eq!(ctx.checkpoint_event_id, 2);
    assert_eq!(ctx.target_event_id, 3);
}

#[tokio::test]
async fn checkpoint_never_moves_backwards_across_attempts() {
    let f = Fixture::new().await;
    f.clean_tree(1).await;
    let reconciler = f.reconciler(Arc::new(ScriptedExecutor::new()));
    reconciler.run(1).await;
    assert_eq!(f.checkpoints.get(1).await.unwrap().unwrap().last_event_id, 2);

    f.checkpoints.advance(1, 1, false).await;
    let report = reconciler.run(1).await;
    assert_eq!(report.outcome, Outcome::NoOp);
    assert_eq!(f.checkpoints.get(1).await.unwrap().unwrap().last_event_id, 2);
}
