use std::sync::Arc;
use std::time::Duration;

use fw_core::config::AdmissionConfig;
use fw_harness::admission::{AdmissionLock, LockState};
use fw_harness::kv::{KvStore, MemoryKv};
use fw_harness::queue::TaskQueue;

fn lock_with(kv: Arc<MemoryKv>, ttl: Duration) -> AdmissionLock {
    let config = AdmissionConfig::default();
    let queue = TaskQueue::new(kv.clone(), config.queue_name);
    AdmissionLock::new(kv, queue, config.lock_prefix, ttl)
}

fn lock() -> (Arc<MemoryKv>, AdmissionLock) {
    let kv = MemoryKv::shared();
    let lock = AdmissionLock::from_config(kv.clone(), &AdmissionConfig::default());
    (kv, lock)
}

#[tokio::test]
async fn first_request_is_admitted_and_enqueued() {
    let (kv, lock) = lock();
    assert!(lock.try_admit(7).await.unwrap());
    assert_eq!(lock.state(7).await.unwrap(), LockState::Queued);
    assert_eq!(
        kv.get("organize:task:lock:7").await.unwrap().value.as_deref(),
        Some("queued")
    );
    assert_eq!(lock.queue().len().await.unwrap(), 1);
    assert_eq!(
        lock.queue().pop(Some(Duration::from_millis(10))).await.unwrap(),
        Some(7)
    );
}

#[tokio::test]
async fn second_request_is_rejected_until_release() {
    let (_, lock) = lock();
    assert!(lock.try_admit(1).await.unwrap());
    assert!(!lock.try_admit(1).await.unwrap());
    assert_eq!(lock.queue().len().await.unwrap(), 1);

    lock.release(1).await.unwrap();
    assert_eq!(lock.state(1).await.unwrap(), LockState::Absent);
    assert!(lock.try_admit(1).await.unwrap());
    assert_eq!(lock.queue().len().await.unwrap(), 2);
}

#[tokio::test]
async fn running_lock_still_blocks_admission() {
    let (_, lock) = lock();
    assert!(lock.try_admit(1).await.unwrap());
    lock.mark_running(1).await.unwrap();
    assert_eq!(lock.state(1).await.unwrap(), LockState::Running);
    assert!(!lock.try_admit(1).await.unwrap());
}

#[tokio::test]
async fn users_do_not_block_each_other() {
    let (_, lock) = lock();
    assert!(lock.try_admit(1).await.unwrap());
    assert!(lock.try_admit(2).await.unwrap());
    assert_eq!(lock.queue().len().await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_admit_exactly_once() {
    let (_, lock) = lock();
    let mut handles = Vec::new();
    for _ in 0..16 {
        let lock = lock.clone();
        handles.push(tokio::spawn(async move { lock.try_admit(42).await.unwrap() }));
    }
    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(lock.queue().len().await.unwrap(), 1);
}

#[tokio::test]
async fn conflicts_are_retried_transparently() {
    let (kv, lock) = lock();
    kv.force_conflicts(3);
    assert!(lock.try_admit(5).await.unwrap());
    assert_eq!(lock.queue().len().await.unwrap(), 1);
}

#[tokio::test]
async fn expired_lock_reopens_admission() {
    let kv = MemoryKv::shared();
    let lock = lock_with(kv, Duration::from_millis(20));
    assert!(lock.try_admit(3).await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(lock.state(3).await.unwrap(), LockState::Absent);
    assert!(lock.try_admit(3).await.unwrap());
}
