use crate::domain::order::OrderId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrderflowError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Provider error: {0}")]
    Adapter(String),
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },
    #[error("Post-purchase task '{task}' failed: {message}")]
    FanOutTask { task: String, message: String },
    #[error("Order not found: {0}")]
    NotFound(OrderId),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl OrderflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Internal(message.into())
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for OrderflowError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Internal(Box::new(err))
    }
}

impl From<serde_json::Error> for OrderflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, OrderflowError>;
