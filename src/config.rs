use crate::error::{OrderflowError, Result};
use std::time::Duration;

/// Runtime knobs for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Upper bound on a single provider charge. Exceeding it fails the order.
    pub provider_timeout: Duration,
    /// Upper bound on each post-purchase task.
    pub task_timeout: Duration,
    /// Group name for paid orders without a conversion source or affiliate.
    pub unattributed_label: String,
    /// Where operator sale notices are posted.
    pub operator_channel: String,
    /// How many fan-out reports are kept for inspection.
    pub report_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
            task_timeout: Duration::from_secs(5),
            unattributed_label: "unknown".to_string(),
            operator_channel: "#sales".to_string(),
            report_history: 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.provider_timeout.is_zero() {
            return Err(OrderflowError::validation("Provider timeout must be non-zero"));
        }
        if self.task_timeout.is_zero() {
            return Err(OrderflowError::validation("Task timeout must be non-zero"));
        }
        if self.unattributed_label.trim().is_empty() {
            return Err(OrderflowError::validation(
                "Unattributed label must not be empty",
            ));
        }
        Ok(())
    }
}
