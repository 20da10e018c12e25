use crate::error::Result;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinError;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SupervisorStats {
    pub completed: usize,
    pub failed: usize,
    pub panicked: usize,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    panicked: AtomicUsize,
    idle: Notify,
}

impl Counters {
    fn record(&self, label: &str, finished: std::result::Result<Result<()>, JoinError>) {
        match finished {
            Ok(Ok(())) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(err)) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                error!(task = %label, error = %err, "Supervised task failed");
            }
            Err(err) => {
                self.panicked.fetch_add(1, Ordering::SeqCst);
                error!(task = %label, error = %err, "Supervised task panicked");
            }
        }
    }

    fn finish(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Owns background work spawned by the engine.
///
/// Every task returns a `Result`; errors and panics are logged and counted
/// rather than dropped. A task is counted as active from `spawn` until its
/// outcome is recorded, so a task spawned by another supervised task keeps
/// the supervisor busy without a gap.
#[derive(Default)]
pub struct TaskSupervisor {
    counters: Arc<Counters>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, label: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        debug!(task = %label, "Spawning supervised task");
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(task);
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            let finished = handle.await;
            counters.record(&label, finished);
            counters.finish();
        });
    }

    /// Waits until no supervised task is active, including tasks spawned
    /// while waiting. Any number of callers may wait at once.
    pub async fn wait_idle(&self) -> SupervisorStats {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.counters.active.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        self.stats()
    }

    /// Number of supervised tasks that have not finished yet.
    pub async fn pending(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            panicked: self.counters.panicked.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrderflowError;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_wait_idle_counts_each_outcome() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn("ok", async { Ok(()) }).await;
        supervisor
            .spawn("err", async { Err(OrderflowError::internal("boom")) })
            .await;
        supervisor
            .spawn("panic", async {
                if true {
                    panic!("task exploded");
                }
                Ok(())
            })
            .await;

        let stats = supervisor.wait_idle().await;
        assert_eq!(
            stats,
            SupervisorStats {
                completed: 1,
                failed: 1,
                panicked: 1
            }
        );
        assert_eq!(supervisor.pending().await, 0);
    }

    #[tokio::test]
    async fn test_wait_idle_drains_nested_spawns() {
        let supervisor = Arc::new(TaskSupervisor::new());
        let inner = Arc::clone(&supervisor);
        supervisor
            .spawn("outer", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                inner.spawn("inner", async { Ok(()) }).await;
                Ok(())
            })
            .await;

        let stats = supervisor.wait_idle().await;
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_waiters_block_until_idle() {
        let supervisor = Arc::new(TaskSupervisor::new());
        supervisor
            .spawn("slow", async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            })
            .await;

        let started = Instant::now();
        let (first, second) = tokio::join!(supervisor.wait_idle(), supervisor.wait_idle());

        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(first.completed, 1);
        assert_eq!(second.completed, 1);
        assert_eq!(supervisor.pending().await, 0);
    }

    #[tokio::test]
    async fn test_pending_counts_running_tasks() {
        let supervisor = TaskSupervisor::new();
        supervisor
            .spawn("slow", async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;

        assert_eq!(supervisor.pending().await, 1);
        supervisor.wait_idle().await;
        assert_eq!(supervisor.pending().await, 0);
    }
}
