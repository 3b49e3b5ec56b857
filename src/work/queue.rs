//! Deduplicated work queue with bounded concurrent execution.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{WorkItem, WorkStatus};
use crate::error::{AgentError, Result};
use crate::outbound::{OutboundMessage, OutboundQueue};
use crate::snapshot::{read_json_or_default, write_json};

/// Consecutive contended dequeues tolerated before a dispatch cycle gives up.
const MAX_DEQUEUE_FAILURES: usize = 5;

enum Dequeue {
    Item(WorkItem),
    Empty,
    Contended,
}

/// Executes one work item and returns the message for its terminal report.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, item: &WorkItem) -> Result<String>;
}

pub struct WorkQueue {
    waiting: Mutex<VecDeque<WorkItem>>,
    in_flight: Mutex<HashMap<Uuid, WorkItem>>,
    in_progress: AtomicUsize,
    outbound: Arc<OutboundQueue>,
}

impl WorkQueue {
    pub fn new(outbound: Arc<OutboundQueue>) -> Self {
        Self::with_items(outbound, VecDeque::new())
    }

    fn with_items(outbound: Arc<OutboundQueue>, items: VecDeque<WorkItem>) -> Self {
        Self {
            waiting: Mutex::new(items),
            in_flight: Mutex::new(HashMap::new()),
            in_progress: AtomicUsize::new(0),
            outbound,
        }
    }

    /// Restore from `WorkQueue.json`. Items that were executing when the
    /// snapshot was taken are queued again.
    pub fn load_snapshot(path: &Path, outbound: Arc<OutboundQueue>) -> Self {
        let items: Vec<WorkItem> = read_json_or_default(path);
        let mut waiting = VecDeque::with_capacity(items.len());
        for item in items {
            if waiting.iter().any(|w: &WorkItem| w.id == item.id) {
                log::warn!("Dropping duplicate work item {} from snapshot", item.id);
                continue;
            }
            waiting.push_back(item);
        }
        if !waiting.is_empty() {
            log::info!("Restored {} work item(s) from {:?}", waiting.len(), path);
        }
        Self::with_items(outbound, waiting)
    }

    /// Persist in-flight items followed by the waiting queue.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let mut items: Vec<WorkItem> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        items.extend(
            self.waiting
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .cloned(),
        );
        write_json(path, &items)
    }

    /// Queue an item unless one with the same id is waiting or executing.
    pub fn enqueue(&self, mut item: WorkItem) -> bool {
        let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_in_flight(&item.id) {
            log::info!("Work item {} is already executing, ignoring", item.id);
            return false;
        }
        if waiting.iter().any(|w| w.id == item.id) {
            log::info!("Work item {} is already queued, ignoring", item.id);
            return false;
        }

        item.advance(WorkStatus::PickedUp);
        let id = item.id;
        waiting.push_back(item);
        drop(waiting);

        self.outbound.push(OutboundMessage::work_status(
            id,
            WorkStatus::PickedUp,
            "Work item picked up",
        ));
        true
    }

    /// Start as many waiting items as the concurrency ceiling allows.
    ///
    /// Returns the number of items started this cycle.
    pub fn try_dispatch(
        self: &Arc<Self>,
        max_concurrent: usize,
        executor: &Arc<dyn WorkExecutor>,
    ) -> usize {
        let mut started = 0;
        let mut failures = 0;

        while self.in_progress() < max_concurrent {
            match self.try_dequeue() {
                Dequeue::Item(item) => {
                    failures = 0;
                    self.start(item, executor);
                    started += 1;
                }
                Dequeue::Empty => break,
                Dequeue::Contended => {
                    failures += 1;
                    if failures >= MAX_DEQUEUE_FAILURES {
                        log::warn!(
                            "Work queue dequeue failed {} times, retrying next tick",
                            failures
                        );
                        break;
                    }
                }
            }
        }
        started
    }

    /// Pop the next item and mark it in flight while the waiting lock is held,
    /// so an id is always visible to `enqueue` in one of the two sets.
    fn try_dequeue(&self) -> Dequeue {
        let mut waiting = match self.waiting.try_lock() {
            Ok(waiting) => waiting,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return Dequeue::Contended,
        };
        let Some(mut item) = waiting.pop_front() else {
            return Dequeue::Empty;
        };
        if item.status != WorkStatus::InProgress {
            item.advance(WorkStatus::InProgress);
        }
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item.id, item.clone());
        Dequeue::Item(item)
    }

    fn start(self: &Arc<Self>, item: WorkItem, executor: &Arc<dyn WorkExecutor>) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
        self.outbound.push(OutboundMessage::work_status(
            item.id,
            WorkStatus::InProgress,
            "Work item started",
        ));

        let queue = Arc::clone(self);
        let executor = Arc::clone(executor);
        tokio::spawn(async move {
            let task_item = item.clone();
            let execution = tokio::spawn(async move { executor.execute(&task_item).await });
            let result = match execution.await {
                Ok(result) => result,
                Err(e) => Err(AgentError::other(format!("work item task aborted: {e}"))),
            };
            queue.complete(item, result);
        });
    }

    /// Record the outcome of an executed item and emit its terminal report.
    pub fn complete(&self, mut item: WorkItem, result: Result<String>) {
        let _ = self
            .in_progress
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&item.id);

        let (status, message) = match result {
            Ok(message) => (WorkStatus::Completed, message),
            Err(e) => {
                log::warn!("Work item {} failed: {}", item.id, e);
                (WorkStatus::Failed, e.to_string())
            }
        };
        item.advance(status);
        log::info!("Work item {} finished: {:?}", item.id, status);
        self.outbound
            .push(OutboundMessage::work_status(item.id, status, message));
    }

    pub fn in_progress(&self) -> usize {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_in_flight(&self, id: &Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::{WorkExecutor, WorkQueue};
    use crate::error::{AgentError, Result};
    use crate::outbound::{OutboundMessage, OutboundQueue};
    use crate::work::{TargetType, WorkItem, WorkStatus};

    /// Blocks every execution until released, tracking peak concurrency.
    #[derive(Default)]
    struct GatedExecutor {
        running: AtomicUsize,
        peak: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl WorkExecutor for GatedExecutor {
        async fn execute(&self, _item: &WorkItem) -> Result<String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.release.notified().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok("done".into())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl WorkExecutor for FailingExecutor {
        async fn execute(&self, _item: &WorkItem) -> Result<String> {
            Err(AgentError::steamcmd("exit code 8"))
        }
    }

    fn statuses_for(outbound: &OutboundQueue, id: uuid::Uuid) -> Vec<WorkStatus> {
        outbound
            .snapshot()
            .into_iter()
            .filter_map(|m| match m.message {
                OutboundMessage::WorkStatus(update) if update.work_id == id => Some(update.status),
                _ => None,
            })
            .collect()
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(check(), "condition not reached in time");
    }

    #[test]
    fn duplicate_enqueue_is_a_no_op() {
        let outbound = Arc::new(OutboundQueue::new());
        let queue = WorkQueue::new(Arc::clone(&outbound));
        let item = WorkItem::new(TargetType::Start, Vec::new());

        assert!(queue.enqueue(item.clone()));
        assert!(!queue.enqueue(item.clone()));
        assert_eq!(queue.len(), 1);
        assert_eq!(statuses_for(&outbound, item.id), vec![WorkStatus::PickedUp]);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_ceiling() {
        let outbound = Arc::new(OutboundQueue::new());
        let queue = Arc::new(WorkQueue::new(Arc::clone(&outbound)));
        for _ in 0..20 {
            queue.enqueue(WorkItem::new(TargetType::Backup, Vec::new()));
        }

        let gated = Arc::new(GatedExecutor::default());
        let executor: Arc<dyn WorkExecutor> = Arc::clone(&gated) as Arc<dyn WorkExecutor>;

        assert_eq!(queue.try_dispatch(3, &executor), 3);
        assert_eq!(queue.try_dispatch(3, &executor), 0);
        assert_eq!(queue.in_progress(), 3);
        assert_eq!(queue.len(), 17);

        wait_until(|| gated.running.load(Ordering::SeqCst) == 3).await;
        gated.release.notify_waiters();
        wait_until(|| queue.in_progress() == 0).await;

        while !queue.is_empty() || queue.in_progress() > 0 {
            queue.try_dispatch(3, &executor);
            assert!(queue.in_progress() <= 3);
            tokio::time::sleep(Duration::from_millis(5)).await;
            gated.release.notify_waiters();
        }
        assert!(gated.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn in_flight_item_cannot_be_requeued() {
        let outbound = Arc::new(OutboundQueue::new());
        let queue = Arc::new(WorkQueue::new(Arc::clone(&outbound)));
        let item = WorkItem::new(TargetType::Install, Vec::new());
        queue.enqueue(item.clone());

        let gated = Arc::new(GatedExecutor::default());
        let executor: Arc<dyn WorkExecutor> = Arc::clone(&gated) as Arc<dyn WorkExecutor>;
        queue.try_dispatch(1, &executor);

        assert!(queue.is_in_flight(&item.id));
        assert!(!queue.enqueue(item.clone()));
        assert!(queue.is_empty());

        wait_until(|| gated.running.load(Ordering::SeqCst) == 1).await;
        gated.release.notify_waiters();
        wait_until(|| !queue.is_in_flight(&item.id)).await;
        assert_eq!(
            statuses_for(&outbound, item.id),
            vec![WorkStatus::PickedUp, WorkStatus::InProgress, WorkStatus::Completed]
        );
    }

    #[tokio::test]
    async fn failures_produce_a_failed_report() {
        let outbound = Arc::new(OutboundQueue::new());
        let queue = Arc::new(WorkQueue::new(Arc::clone(&outbound)));
        let item = WorkItem::new(TargetType::Update, Vec::new());
        queue.enqueue(item.clone());

        let executor: Arc<dyn WorkExecutor> = Arc::new(FailingExecutor);
        queue.try_dispatch(4, &executor);
        wait_until(|| queue.in_progress() == 0).await;

        let last = outbound.snapshot().pop().unwrap();
        let OutboundMessage::WorkStatus(update) = last.message else {
            unreachable!("last report is not a work status");
        };
        assert_eq!(update.status, WorkStatus::Failed);
        assert!(update.message.contains("exit code 8"));
    }

    #[test]
    fn snapshot_round_trips_waiting_items() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("WorkQueue.json");
        let outbound = Arc::new(OutboundQueue::new());

        let queue = WorkQueue::new(Arc::clone(&outbound));
        let first = WorkItem::new(TargetType::Install, b"{}".to_vec());
        let second = WorkItem::new(TargetType::Start, Vec::new());
        queue.enqueue(first.clone());
        queue.enqueue(second.clone());
        queue.save_snapshot(&path).unwrap();

        let restored = WorkQueue::load_snapshot(&path, outbound);
        assert_eq!(restored.len(), 2);
        assert!(!restored.enqueue(first));
        let items = restored.waiting.lock().unwrap();
        assert_eq!(items[0].work_data, b"{}");
        assert_eq!(items[1].id, second.id);
        assert_eq!(items[1].status, WorkStatus::PickedUp);
    }

    #[tokio::test]
    async fn contended_dispatch_gives_up_until_next_tick() {
        let outbound = Arc::new(OutboundQueue::new());
        let queue = Arc::new(WorkQueue::new(Arc::clone(&outbound)));
        let item = WorkItem::new(TargetType::Stop, Vec::new());
        queue.enqueue(item.clone());
        let executor: Arc<dyn WorkExecutor> = Arc::new(FailingExecutor);

        let held = queue.waiting.lock().unwrap();
        assert_eq!(queue.try_dispatch(2, &executor), 0);
        assert_eq!(queue.in_progress(), 0);
        assert!(!queue.is_in_flight(&item.id));
        drop(held);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_dispatch(2, &executor), 1);
        wait_until(|| queue.in_progress() == 0).await;
        assert_eq!(
            statuses_for(&outbound, item.id),
            vec![WorkStatus::PickedUp, WorkStatus::InProgress, WorkStatus::Failed]
        );
    }
}
