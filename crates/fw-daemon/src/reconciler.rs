//! The reconciliation driver.
//!
//! One admitted request becomes one [`Reconciler::run`]: plan from the
//! incremental context, hand the executor a brief, validate the live tree,
//! and either commit the checkpoint, retry with a corrective brief, or give
//! up. Every attempt ends with exactly one notification.
//!
//! The commit target is the latest event id seen at planning time. Events
//! appended while the executor runs are newer than that and stay pending
//! for the next attempt.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use fw_core::checkpoint::CheckpointStore;
use fw_core::config::ReconcileConfig;
use fw_core::db::{Database, StoreError};
use fw_core::event_log::EventLog;
use fw_core::incremental::IncrementalLoader;
use fw_core::invariants::InvariantChecker;
use fw_core::tree::TreeStore;
use fw_core::types::{EventId, UserId};
use fw_harness::admission::AdmissionLock;
use fw_harness::capabilities::{CapabilityHost, TokenUsage};
use fw_harness::policy::{ExecutionRequest, PolicyError, PolicyExecutor};
use fw_telemetry::tracing_setup::{create_child_span, create_operation_span};
use tracing::{debug, error, info, warn, Instrument};

use crate::brief::{corrective_brief, full_scan_brief, incremental_brief};
use crate::notify::{deliver, NotificationSink};
use crate::plan::{select_plan, Plan, ScanMode};
use crate::state_machine::{ReconcileEvent, ReconcileState, ReconcileStateMachine, StateMachineError};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
    #[error("attempt panicked")]
    Panicked,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoOp,
    Committed,
    Abandoned { violations: String },
    Failed { error: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NoOp => f.write_str("no changes since the last organize checkpoint"),
            Outcome::Committed => f.write_str("organization complete, all folders pass validation"),
            Outcome::Abandoned { violations } => {
                write!(f, "organization incomplete after all attempts:\n{violations}")
            }
            Outcome::Failed { error } => write!(f, "task execution failed: {error}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub user_id: UserId,
    pub trace_id: String,
    /// `None` if planning itself failed.
    pub plan: Option<Plan>,
    pub outcome: Outcome,
    pub checkpoint_event_id: EventId,
    pub target_event_id: EventId,
    /// Executor rounds run, the first one included.
    pub attempts: u32,
    /// The checkpoint write for this attempt actually landed.
    pub checkpoint_advanced: bool,
    pub usage: TokenUsage,
    pub steps: u64,
    pub trace: String,
    pub history: Vec<(ReconcileState, ReconcileEvent, ReconcileState)>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl ReconcileReport {
    pub fn final_state(&self) -> Option<ReconcileState> {
        self.history.last().map(|(_, _, to)| *to)
    }

    pub fn mode_label(&self) -> &'static str {
        match self.plan {
            None => "unknown",
            Some(Plan::NoOp) => "noop",
            Some(Plan::Run { mode, .. }) => mode.as_str(),
        }
    }

    pub fn notification_title(&self) -> String {
        format!(
            "Your file organization task started at {} has finished",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    pub fn notification_content(&self) -> String {
        let checkpoint = if self.checkpoint_advanced {
            format!(
                "advanced to event {}",
                self.target_event_id.max(self.checkpoint_event_id)
            )
        } else {
            format!("not advanced, still at event {}", self.checkpoint_event_id)
        };
        let trace = if self.trace.is_empty() {
            "(empty)"
        } else {
            self.trace.as_str()
        };
        format!(
            "Elapsed: {:.2}s\n\
             Input tokens: {}\n\
             Output tokens: {}\n\
             Total tokens: {}\n\
             Outcome: {}\n\
             Checkpoint: {}\n\
             Mode: {}\n\
             Attempts: {}\n\
             Trace id: {}\n\
             Trace:\n{}",
            self.elapsed.as_secs_f64(),
            self.usage.input_tokens,
            self.usage.output_tokens,
            self.usage.total_tokens,
            self.outcome,
            checkpoint,
            self.mode_label(),
            self.attempts,
            self.trace_id,
            trace,
        )
    }
}

#[derive(Debug, Default)]
struct Progress {
    plan: Option<Plan>,
    checkpoint_event_id: EventId,
    target_event_id: EventId,
    rounds: u32,
    checkpoint_advanced: bool,
}

#[derive(Clone)]
pub struct Reconciler {
    loader: IncrementalLoader,
    checkpoints: CheckpointStore,
    tree: TreeStore,
    checker: InvariantChecker,
    executor: Arc<dyn PolicyExecutor>,
    notifier: Arc<dyn NotificationSink>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        db: &Database,
        executor: Arc<dyn PolicyExecutor>,
        notifier: Arc<dyn NotificationSink>,
        config: ReconcileConfig,
    ) -> Self {
        let events = EventLog::new(db);
        let checkpoints = CheckpointStore::new(db);
        Self {
            loader: IncrementalLoader::new(events.clone(), checkpoints.clone())
                .with_summary_lines(config.summary_lines),
            checkpoints,
            tree: TreeStore::new(db, events),
            checker: InvariantChecker::new(db),
            executor,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Run a dequeued task while holding its admission lock.
    ///
    /// The lock is released on every path out, a panic included.
    pub async fn run_admitted(&self, user_id: UserId, lock: &AdmissionLock) -> Option<ReconcileReport> {
        if let Err(e) = lock.mark_running(user_id).await {
            warn!(user_id, error = %e, "could not mark lock running");
        }
        let result = AssertUnwindSafe(self.run(user_id)).catch_unwind().await;
        if let Err(e) = lock.release(user_id).await {
            error!(user_id, error = %e, "failed to release admission lock");
        }
        match result {
            Ok(report) => Some(report),
            Err(_) => {
                error!(user_id, "reconciliation panicked");
                None
            }
        }
    }

    /// One full attempt, notification included. Never fails: errors end up
    /// in the report's outcome.
    pub async fn run(&self, user_id: UserId) -> ReconcileReport {
        let (span, trace_id) = create_operation_span("reconcile");
        self.run_traced(user_id, trace_id).instrument(span).await
    }

    async fn run_traced(&self, user_id: UserId, trace_id: String) -> ReconcileReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let host = CapabilityHost::new(user_id, &self.tree, self.checker.clone(), self.config.max_steps);
        let mut sm = ReconcileStateMachine::new();
        let mut progress = Progress::default();

        let driven = AssertUnwindSafe(self.drive(user_id, &trace_id, &host, &mut sm, &mut progress))
            .catch_unwind()
            .await
            .unwrap_or(Err(ReconcileError::Panicked));

        let outcome = match driven {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(user_id, state = %sm.state(), error = %e, "reconciliation failed");
                if sm.can_transition(ReconcileEvent::Fail) {
                    let _ = sm.transition(ReconcileEvent::Fail);
                }
                Outcome::Failed { error: e.to_string() }
            }
        };
        if sm.can_transition(ReconcileEvent::Finish) {
            let _ = sm.transition(ReconcileEvent::Finish);
        }

        let report = ReconcileReport {
            user_id,
            trace_id,
            plan: progress.plan,
            outcome,
            checkpoint_event_id: progress.checkpoint_event_id,
            target_event_id: progress.target_event_id,
            attempts: progress.rounds,
            checkpoint_advanced: progress.checkpoint_advanced,
            usage: host.usage(),
            steps: host.total_steps(),
            trace: host.render_trace(),
            history: sm.history().to_vec(),
            started_at,
            elapsed: clock.elapsed(),
        };
        info!(
            user_id,
            mode = report.mode_label(),
            attempts = report.attempts,
            steps = report.steps,
            total_tokens = report.usage.total_tokens,
            advanced = report.checkpoint_advanced,
            "reconciliation finished"
        );
        deliver(
            self.notifier.as_ref(),
            user_id,
            &report.notification_title(),
            &report.notification_content(),
        )
        .await;
        report
    }

    async fn drive(
        &self,
        user_id: UserId,
        trace_id: &str,
        host: &CapabilityHost,
        sm: &mut ReconcileStateMachine,
        progress: &mut Progress,
    ) -> Result<Outcome, ReconcileError> {
        let ctx = self.loader.load(user_id, self.config.max_events).await?;
        progress.checkpoint_event_id = ctx.checkpoint_event_id;
        progress.target_event_id = ctx.target_event_id;

        let plan = select_plan(&ctx);
        progress.plan = Some(plan);
        let mode = match plan {
            Plan::NoOp => {
                sm.transition(ReconcileEvent::NothingPending)?;
                progress.checkpoint_advanced =
                    self.checkpoints.advance(user_id, ctx.target_event_id, false).await;
                info!(user_id, event_id = ctx.target_event_id, "nothing pending");
                return Ok(Outcome::NoOp);
            }
            Plan::Run { mode, reason } => {
                info!(
                    user_id,
                    mode = %mode,
                    ?reason,
                    from = ctx.checkpoint_event_id,
                    to = ctx.target_event_id,
                    total_events = ctx.total_events,
                    "reconciliation planned"
                );
                mode
            }
        };

        let mut brief = match mode {
            ScanMode::Incremental => incremental_brief(user_id, &ctx),
            ScanMode::FullScan => full_scan_brief(user_id),
        };
        sm.transition(ReconcileEvent::Planned)?;
        let session_id = format!("file_org_{user_id}");

        loop {
            let round = host.begin_round();
            progress.rounds = round;
            let request = ExecutionRequest {
                user_id,
                session_id: session_id.clone(),
                brief,
                round,
            };
            let executed = self
                .executor
                .execute(&request, host)
                .instrument(create_child_span(trace_id, "execute"))
                .await?;
            debug!(
                user_id,
                attempt = round,
                executor = self.executor.name(),
                input_tokens = executed.usage.input_tokens,
                output_tokens = executed.usage.output_tokens,
                "executor round returned"
            );
            sm.transition(ReconcileEvent::Executed)?;

            let report = self.checker.validate(user_id).await?;
            if report.is_clean() {
                sm.transition(ReconcileEvent::Clean)?;
                let full_scan = mode == ScanMode::FullScan;
                progress.checkpoint_advanced = self
                    .checkpoints
                    .advance(user_id, ctx.target_event_id, full_scan)
                    .await;
                if !progress.checkpoint_advanced {
                    warn!(user_id, event_id = ctx.target_event_id, "committed but checkpoint write failed");
                }
                info!(user_id, attempt = round, event_id = ctx.target_event_id, "reconciliation committed");
                return Ok(Outcome::Committed);
            }

            if round >= self.config.max_attempts {
                sm.transition(ReconcileEvent::Exhausted)?;
                info!(user_id, attempt = round, "reconciliation abandoned, tree still dirty");
                return Ok(Outcome::Abandoned {
                    violations: report.render_violations(),
                });
            }

            debug!(user_id, attempt = round, "validation failed, retrying");
            sm.transition(ReconcileEvent::Dirty)?;
            brief = corrective_brief(&report);
            sm.transition(ReconcileEvent::Retry)?;
        }
    }
}
