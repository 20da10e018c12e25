use super::analytics::AnalyticsAggregator;
use super::fanout::FanOutCoordinator;
use super::orchestrator::{PaymentOrchestrator, ProcessOutcome, ProviderRegistry};
use super::supervisor::{SupervisorStats, TaskSupervisor};
use crate::config::EngineConfig;
use crate::domain::order::{NewOrder, Order, OrderId};
use crate::domain::ports::{SharedOrderStore, SharedTask};
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// The main entry point for order intake and payment processing.
///
/// `OrderEngine` is constructed once and wires the store, the provider
/// registry, the post-purchase tasks and the background supervisor together.
/// Clones share all components.
#[derive(Clone)]
pub struct OrderEngine {
    store: SharedOrderStore,
    supervisor: Arc<TaskSupervisor>,
    orchestrator: PaymentOrchestrator,
    fan_out: Arc<FanOutCoordinator>,
    analytics: Arc<AnalyticsAggregator>,
}

impl OrderEngine {
    /// Creates a new `OrderEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - The canonical order store.
    /// * `providers` - The provider used for each payment method.
    /// * `tasks` - The post-purchase tasks run for every paid order.
    /// * `config` - Timeouts and labels.
    pub fn new(
        store: SharedOrderStore,
        providers: ProviderRegistry,
        tasks: Vec<SharedTask>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let supervisor = Arc::new(TaskSupervisor::new());
        let fan_out = Arc::new(
            FanOutCoordinator::new(tasks, config.task_timeout)
                .with_history_limit(config.report_history),
        );
        let orchestrator = PaymentOrchestrator::new(
            Arc::clone(&store),
            Arc::new(providers),
            Arc::clone(&fan_out),
            Arc::clone(&supervisor),
            config.provider_timeout,
        );
        let analytics = Arc::new(AnalyticsAggregator::new(
            Arc::clone(&store),
            config.unattributed_label.clone(),
        ));
        Ok(Self {
            store,
            supervisor,
            orchestrator,
            fan_out,
            analytics,
        })
    }

    /// Validates and stores a new order, then schedules its payment in the
    /// background. Returns as soon as the order is stored.
    pub async fn create_order(&self, new: NewOrder) -> Result<OrderId> {
        let order = self.store.create(new).await?;
        info!(
            order_id = %order.id,
            product_id = %order.product_id,
            amount = %order.amount,
            currency = %order.currency,
            method = %order.payment_method,
            "Order created"
        );

        let id = order.id;
        let orchestrator = self.orchestrator.clone();
        self.supervisor
            .spawn(format!("payment {id}"), async move {
                orchestrator.process(id).await.map(|_| ())
            })
            .await;
        Ok(id)
    }

    /// Processes an order's payment inline. Re-invoking it on a terminal
    /// order is a no-op.
    pub async fn process(&self, id: OrderId) -> Result<ProcessOutcome> {
        self.orchestrator.process(id).await
    }

    pub async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        self.store.get(id).await
    }

    pub async fn orders(&self) -> Result<Vec<Order>> {
        self.store.all().await
    }

    /// Waits until every payment and fan-out scheduled so far has finished.
    pub async fn wait_idle(&self) -> SupervisorStats {
        self.supervisor.wait_idle().await
    }

    pub fn analytics(&self) -> &AnalyticsAggregator {
        &self.analytics
    }

    pub fn fan_out(&self) -> &FanOutCoordinator {
        &self.fan_out
    }

    pub fn store(&self) -> &SharedOrderStore {
        &self.store
    }
}
