use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fw_core::config::Config;
use fw_core::db::Database;
use fw_core::event_log::EventLog;
use fw_core::tree::TreeStore;
use fw_core::types::UserId;
use fw_harness::admission::AdmissionLock;
use fw_harness::kv::{KvStore, MemoryKv};
use fw_harness::policy::PolicyExecutor;
use fw_harness::shutdown::ShutdownSignal;
use tracing::{error, info};

use crate::notify::NotificationSink;
use crate::reconciler::Reconciler;
use crate::worker::WorkerPool;

/// The foldwise background daemon.
///
/// Owns the store, the admission lock and the worker pool. User-facing
/// tree mutations go through [`Daemon::tree`], which records change
/// events; reconciliation is requested with
/// [`Daemon::request_reconciliation`].
pub struct Daemon {
    config: Config,
    db: Database,
    tree: TreeStore,
    lock: AdmissionLock,
    reconciler: Reconciler,
    shutdown: ShutdownSignal,
    pool: Option<WorkerPool>,
}

impl Daemon {
    /// Assemble a daemon from already-open parts.
    pub fn with_parts(
        config: Config,
        db: Database,
        kv: Arc<dyn KvStore>,
        executor: Arc<dyn PolicyExecutor>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let tree = TreeStore::new(&db, EventLog::new(&db));
        let lock = AdmissionLock::from_config(kv, &config.admission);
        let reconciler = Reconciler::new(&db, executor, notifier, config.reconcile.clone());
        Self {
            config,
            db,
            tree,
            lock,
            reconciler,
            shutdown: ShutdownSignal::new(),
            pool: None,
        }
    }

    /// Open the configured SQLite store and use a process-local KV store.
    pub async fn new(
        config: Config,
        executor: Arc<dyn PolicyExecutor>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let path = config.store.resolved_path();
        let db = Database::open(&path)
            .await
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        info!(path = %path.display(), "store opened");
        Ok(Self::with_parts(config, db, MemoryKv::shared(), executor, notifier))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Tracked tree view for user-facing mutations.
    pub fn tree(&self) -> &TreeStore {
        &self.tree
    }

    pub fn admission(&self) -> &AdmissionLock {
        &self.lock
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Ask for a reconciliation of `user_id`'s tree.
    ///
    /// Returns `false` if one is already queued or running, or if the
    /// admission store failed.
    pub async fn request_reconciliation(&self, user_id: UserId) -> bool {
        match self.lock.try_admit(user_id).await {
            Ok(admitted) => admitted,
            Err(e) => {
                error!(user_id, error = %e, "admission failed");
                false
            }
        }
    }

    /// Start the worker pool. Later calls do nothing.
    pub fn start_workers(&mut self) {
        if self.pool.is_some() {
            return;
        }
        self.pool = Some(WorkerPool::spawn(
            self.config.worker.workers,
            self.reconciler.clone(),
            self.lock.clone(),
            Duration::from_millis(self.config.worker.pop_timeout_ms),
            self.shutdown.clone(),
        ));
    }

    /// Stop the workers, letting in-flight attempts finish.
    pub async fn shutdown(&mut self) {
        if !self.shutdown.is_shutting_down() {
            self.shutdown.trigger();
        }
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
    }

    /// Run workers until the shutdown signal fires.
    pub async fn run(mut self) {
        self.start_workers();
        self.shutdown.wait().await;
        info!("shutdown requested, draining workers");
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
    }
}
