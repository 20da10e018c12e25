use crate::domain::order::{NewOrder, Order, OrderId, OrderStatus, Transition};
use crate::domain::ports::OrderStore;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory order store.
///
/// Uses `Arc<RwLock<HashMap<OrderId, Order>>>` so clones share the same
/// orders. Transitions take the write lock only for the status check and the
/// update, which makes them atomic with respect to each other.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    orders
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, new: NewOrder) -> Result<Order> {
        let order = Order::create(new, Utc::now())?;
        let mut orders = self.orders.write().await;
        orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn transition(&self, id: OrderId, transition: Transition) -> Result<bool> {
        let mut orders = self.orders.write().await;
        Ok(orders
            .get_mut(&id)
            .is_some_and(|order| order.apply(transition, Utc::now())))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(sorted(
            orders
                .values()
                .filter(|order| order.status == status)
                .cloned()
                .collect(),
        ))
    }

    async fn all(&self) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(sorted(orders.values().cloned().collect()))
    }

    async fn paid_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(sorted(
            orders
                .values()
                .filter(|order| order.status == OrderStatus::Paid)
                .filter(|order| order.paid_at.is_some_and(|at| at >= from && at < to))
                .cloned()
                .collect(),
        ))
    }
}

impl InMemoryOrderStore {
    /// Inserts an already-built order as-is. Used to seed fixtures with
    /// historical timestamps.
    pub async fn insert(&self, order: Order) {
        let mut orders = self.orders.write().await;
        orders.insert(order.id, order);
    }
}
