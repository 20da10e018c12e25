use super::money::{Amount, Currency, Revenue};
use super::order::{NewOrder, Order, OrderId, OrderStatus, Transition};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

/// Canonical storage for orders and their single status transition.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Validates `new`, stores it as `Pending`, and returns the stored order.
    async fn create(&self, new: NewOrder) -> Result<Order>;

    /// Atomically moves a `Pending` order to the transition's target status.
    ///
    /// Returns `Ok(false)` when the order does not exist or is already
    /// terminal. Among concurrent callers on the same id at most one observes
    /// `Ok(true)`.
    async fn transition(&self, id: OrderId, transition: Transition) -> Result<bool>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;
    async fn all(&self) -> Result<Vec<Order>>;

    /// Paid orders whose `paid_at` lies in `[from, to)`.
    async fn paid_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>>;

    /// Sum of `amount` over orders paid on `date` (UTC).
    async fn revenue_for_day(&self, date: NaiveDate) -> Result<Revenue> {
        let (from, to) = day_bounds(date);
        let orders = self.paid_between(from, to).await?;
        Ok(orders.into_iter().map(|order| order.amount).sum())
    }
}

/// Returns the `[start, end)` UTC bounds of a calendar day.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}

/// What is sent to a payment provider for a single charge.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub amount: Amount,
    pub currency: Currency,
    pub description: String,
}

impl From<&Order> for ChargeRequest {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency.clone(),
            description: order.description(),
        }
    }
}

/// A provider's answer to a charge. Only an approval carries a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// Uniform interface to one external payment provider.
///
/// Implementations may decline by returning `ChargeOutcome::Declined` or fail
/// with an error; callers treat both the same way.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome>;
}

/// One best-effort side effect run after an order is paid.
///
/// Receives a read-only snapshot of the order and has no access to the store.
#[async_trait]
pub trait PostPurchaseTask: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, order: &Order) -> Result<()>;
}

pub type SharedOrderStore = Arc<dyn OrderStore>;
pub type SharedProvider = Arc<dyn PaymentProvider>;
pub type SharedTask = Arc<dyn PostPurchaseTask>;
