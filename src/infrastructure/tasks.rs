//! Post-purchase side effects.
//!
//! Each task renders its message from the paid order and hands it to an
//! `Outbox`. Delivery to real mail, CRM, or chat systems happens elsewhere.

use crate::domain::order::{Order, OrderId};
use crate::domain::ports::{PostPurchaseTask, SharedTask};
use crate::error::{OrderflowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Crm,
    FollowUp,
    Analytics,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEntry {
    pub channel: Channel,
    pub order_id: OrderId,
    pub recipient: String,
    pub message: String,
    pub deliver_at: DateTime<Utc>,
}

/// Shared, append-only record of side effects awaiting delivery.
#[derive(Default, Clone)]
pub struct Outbox {
    entries: Arc<RwLock<Vec<OutboxEntry>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, entry: OutboxEntry) {
        self.entries.write().await.push(entry);
    }

    pub async fn entries(&self) -> Vec<OutboxEntry> {
        self.entries.read().await.clone()
    }

    pub async fn for_channel(&self, channel: Channel) -> Vec<OutboxEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.channel == channel)
            .cloned()
            .collect()
    }
}

fn paid_at(order: &Order, task: &str) -> Result<DateTime<Utc>> {
    order.paid_at.ok_or_else(|| OrderflowError::FanOutTask {
        task: task.to_string(),
        message: format!("order {} has no payment timestamp", order.id),
    })
}

fn greeting(order: &Order) -> String {
    match &order.customer_name {
        Some(name) => format!("Hi {name}"),
        None => "Hi there".to_string(),
    }
}

/// Sends the buyer a receipt for the purchase.
pub struct ConfirmationEmail {
    outbox: Outbox,
}

impl ConfirmationEmail {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl PostPurchaseTask for ConfirmationEmail {
    fn name(&self) -> &str {
        "confirmation_email"
    }

    async fn run(&self, order: &Order) -> Result<()> {
        let deliver_at = paid_at(order, self.name())?;
        let reference = order.transaction_id.as_deref().unwrap_or_default();
        self.outbox
            .push(OutboxEntry {
                channel: Channel::Email,
                order_id: order.id,
                recipient: order.customer_email.to_string(),
                message: format!(
                    "{}, thanks for buying {}. We received {} {} (ref {}).",
                    greeting(order),
                    order.product_name,
                    order.amount,
                    order.currency,
                    reference
                ),
                deliver_at,
            })
            .await;
        Ok(())
    }
}

/// Registers or updates the buyer in the customer book.
pub struct CustomerRecord {
    outbox: Outbox,
}

impl CustomerRecord {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl PostPurchaseTask for CustomerRecord {
    fn name(&self) -> &str {
        "customer_record"
    }

    async fn run(&self, order: &Order) -> Result<()> {
        let deliver_at = paid_at(order, self.name())?;
        let record = serde_json::json!({
            "email": order.customer_email,
            "name": order.customer_name,
            "product_id": order.product_id,
            "source": order.conversion_source,
            "affiliate_id": order.affiliate_id,
        });
        self.outbox
            .push(OutboxEntry {
                channel: Channel::Crm,
                order_id: order.id,
                recipient: order.customer_email.to_string(),
                message: record.to_string(),
                deliver_at,
            })
            .await;
        Ok(())
    }
}

/// Schedules the post-purchase nurture sequence.
pub struct FollowUpSequence {
    outbox: Outbox,
    offsets_days: Vec<i64>,
}

impl FollowUpSequence {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            offsets_days: vec![1, 3, 7],
        }
    }

    pub fn with_offsets(mut self, offsets_days: Vec<i64>) -> Self {
        self.offsets_days = offsets_days;
        self
    }
}

#[async_trait]
impl PostPurchaseTask for FollowUpSequence {
    fn name(&self) -> &str {
        "follow_up_sequence"
    }

    async fn run(&self, order: &Order) -> Result<()> {
        let paid_at = paid_at(order, self.name())?;
        for (step, days) in self.offsets_days.iter().enumerate() {
            self.outbox
                .push(OutboxEntry {
                    channel: Channel::FollowUp,
                    order_id: order.id,
                    recipient: order.customer_email.to_string(),
                    message: format!(
                        "Follow-up {} of {} for {}",
                        step + 1,
                        self.offsets_days.len(),
                        order.product_name
                    ),
                    deliver_at: paid_at + Duration::days(*days),
                })
                .await;
        }
        Ok(())
    }
}

/// Records the purchase event for downstream analytics.
pub struct AnalyticsEvent {
    outbox: Outbox,
}

impl AnalyticsEvent {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl PostPurchaseTask for AnalyticsEvent {
    fn name(&self) -> &str {
        "analytics_event"
    }

    async fn run(&self, order: &Order) -> Result<()> {
        let deliver_at = paid_at(order, self.name())?;
        let event = serde_json::json!({
            "event": "purchase",
            "order_id": order.id,
            "product_id": order.product_id,
            "amount": order.amount,
            "currency": order.currency,
            "payment_method": order.payment_method,
            "source": order.conversion_source,
        });
        self.outbox
            .push(OutboxEntry {
                channel: Channel::Analytics,
                order_id: order.id,
                recipient: "analytics".to_string(),
                message: event.to_string(),
                deliver_at,
            })
            .await;
        Ok(())
    }
}

/// Posts a sale notice to the operator channel.
pub struct OperatorNotification {
    outbox: Outbox,
    channel_name: String,
}

impl OperatorNotification {
    pub fn new(outbox: Outbox, channel_name: impl Into<String>) -> Self {
        Self {
            outbox,
            channel_name: channel_name.into(),
        }
    }
}

#[async_trait]
impl PostPurchaseTask for OperatorNotification {
    fn name(&self) -> &str {
        "operator_notification"
    }

    async fn run(&self, order: &Order) -> Result<()> {
        let deliver_at = paid_at(order, self.name())?;
        self.outbox
            .push(OutboxEntry {
                channel: Channel::Operator,
                order_id: order.id,
                recipient: self.channel_name.clone(),
                message: format!(
                    "New sale: {} for {} {} via {}",
                    order.product_name, order.amount, order.currency, order.payment_method
                ),
                deliver_at,
            })
            .await;
        Ok(())
    }
}

/// The standard five post-purchase tasks, all writing to `outbox`.
pub fn default_tasks(outbox: &Outbox, operator_channel: &str) -> Vec<SharedTask> {
    vec![
        Arc::new(ConfirmationEmail::new(outbox.clone())),
        Arc::new(CustomerRecord::new(outbox.clone())),
        Arc::new(FollowUpSequence::new(outbox.clone())),
        Arc::new(AnalyticsEvent::new(outbox.clone())),
        Arc::new(OperatorNotification::new(outbox.clone(), operator_channel)),
    ]
}
