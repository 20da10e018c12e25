use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::ports::SharedTask;
use crate::error::{OrderflowError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum TaskResult {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task: String,
    pub result: TaskResult,
}

/// One slot per task, in the order the tasks were registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub order_id: OrderId,
    pub outcomes: Vec<TaskOutcome>,
}

impl FanOutReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.result == TaskResult::Ok)
            .map(|o| o.task.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            TaskResult::Failed(error) => Some((o.task.as_str(), error.as_str())),
            TaskResult::Ok => None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Runs the post-purchase tasks for a paid order.
///
/// All tasks start together, each on its own tokio task and under its own
/// timeout. A task that errors, times out, or panics fills its slot with
/// `TaskResult::Failed`; the others are unaffected and nothing is retried.
///
/// Only the most recent reports are kept; older ones are evicted once the
/// history limit is reached.
pub struct FanOutCoordinator {
    tasks: Vec<SharedTask>,
    task_timeout: Duration,
    history_limit: usize,
    reports: RwLock<VecDeque<FanOutReport>>,
}

impl FanOutCoordinator {
    pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

    pub fn new(tasks: Vec<SharedTask>, task_timeout: Duration) -> Self {
        Self {
            tasks,
            task_timeout,
            history_limit: Self::DEFAULT_HISTORY_LIMIT,
            reports: RwLock::new(VecDeque::new()),
        }
    }

    /// Keeps at most `limit` reports. Zero disables the history.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.name()).collect()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn run(&self, order: Order) -> Result<FanOutReport> {
        if order.status != OrderStatus::Paid {
            return Err(OrderflowError::validation(format!(
                "Fan-out requires a paid order, {} is {}",
                order.id, order.status
            )));
        }

        let order = Arc::new(order);
        let timeout = self.task_timeout;
        let handles: Vec<_> = self
            .tasks
            .iter()
            .map(|task| {
                let task = Arc::clone(task);
                let order = Arc::clone(&order);
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, task.run(&order)).await {
                        Ok(result) => result,
                        Err(_) => Err(OrderflowError::Timeout {
                            operation: format!("task '{}'", task.name()),
                            after_ms: timeout.as_millis() as u64,
                        }),
                    }
                })
            })
            .collect();

        let joined = futures::future::join_all(handles).await;

        let outcomes: Vec<TaskOutcome> = self
            .tasks
            .iter()
            .zip(joined)
            .map(|(task, joined)| {
                let result = match joined {
                    Ok(Ok(())) => TaskResult::Ok,
                    Ok(Err(err)) => TaskResult::Failed(err.to_string()),
                    Err(err) => TaskResult::Failed(format!("task panicked: {err}")),
                };
                if let TaskResult::Failed(error) = &result {
                    warn!(task = task.name(), error = %error, "Post-purchase task failed");
                }
                TaskOutcome {
                    task: task.name().to_string(),
                    result,
                }
            })
            .collect();

        let report = FanOutReport {
            order_id: order.id,
            outcomes,
        };
        info!(
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            "Post-purchase fan-out finished"
        );
        if self.history_limit > 0 {
            let mut reports = self.reports.write().await;
            while reports.len() >= self.history_limit {
                reports.pop_front();
            }
            reports.push_back(report.clone());
        }
        Ok(report)
    }

    /// The retained reports, oldest first.
    pub async fn reports(&self) -> Vec<FanOutReport> {
        self.reports.read().await.iter().cloned().collect()
    }
}
