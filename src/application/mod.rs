//! Application layer containing the order orchestration.
//!
//! `OrderEngine` is the entry point: it stores orders, hands their payment to
//! the `PaymentOrchestrator` on a supervised background task, and the
//! orchestrator in turn starts the post-purchase fan-out for paid orders.

pub mod analytics;
pub mod engine;
pub mod fanout;
pub mod orchestrator;
pub mod supervisor;
