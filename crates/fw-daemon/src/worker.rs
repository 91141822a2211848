use std::time::Duration;

use fw_harness::admission::AdmissionLock;
use fw_harness::shutdown::ShutdownSignal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::reconciler::Reconciler;

/// A fixed set of tasks draining the admission queue.
///
/// Different users reconcile in parallel; the admission lock keeps each
/// user to one task at a time. Workers only stop between tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: ShutdownSignal,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        reconciler: Reconciler,
        lock: AdmissionLock,
        pop_timeout: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        let handles = (0..workers.max(1))
            .map(|worker| {
                let reconciler = reconciler.clone();
                let lock = lock.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    worker_loop(worker, reconciler, lock, pop_timeout, shutdown).await;
                })
            })
            .collect::<Vec<_>>();
        info!(workers = handles.len(), "worker pool started");
        Self { handles, shutdown }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every worker and wait for in-flight attempts to finish.
    pub async fn shutdown(self) {
        if !self.shutdown.is_shutting_down() {
            self.shutdown.trigger();
        }
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    reconciler: Reconciler,
    lock: AdmissionLock,
    pop_timeout: Duration,
    shutdown: ShutdownSignal,
) {
    debug!(worker, "worker started");
    loop {
        let popped = tokio::select! {
            _ = shutdown.wait() => break,
            popped = lock.queue().pop(Some(pop_timeout)) => popped,
        };
        match popped {
            Ok(Some(user_id)) => {
                debug!(worker, user_id, "task dequeued");
                reconciler.run_admitted(user_id, &lock).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker, error = %e, "queue pop failed");
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(pop_timeout) => {}
                }
            }
        }
    }
    debug!(worker, "worker stopped");
}
