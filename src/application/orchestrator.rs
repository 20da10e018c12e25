use super::fanout::FanOutCoordinator;
use super::supervisor::TaskSupervisor;
use crate::domain::order::{OrderId, PaymentMethod, Transition};
use crate::domain::ports::{ChargeOutcome, ChargeRequest, SharedOrderStore, SharedProvider};
use crate::error::{OrderflowError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const TRANSITION_ATTEMPTS: u32 = 3;
const TRANSITION_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Maps each payment method to the provider that charges it.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<PaymentMethod, SharedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes every payment method to the same provider.
    pub fn uniform(provider: SharedProvider) -> Self {
        let mut registry = Self::new();
        for method in PaymentMethod::ALL {
            registry.register(method, Arc::clone(&provider));
        }
        registry
    }

    pub fn with(mut self, method: PaymentMethod, provider: SharedProvider) -> Self {
        self.register(method, provider);
        self
    }

    pub fn register(&mut self, method: PaymentMethod, provider: SharedProvider) {
        self.providers.insert(method, provider);
    }

    pub fn get(&self, method: PaymentMethod) -> Option<SharedProvider> {
        self.providers.get(&method).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    AlreadyTerminal,
    /// Another `process` call for the same order is charging right now.
    InFlight,
    /// The charge completed but another writer terminated the order first.
    LostRace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Paid { transaction_id: String },
    Failed { reason: String },
    Skipped(SkipReason),
}

/// Releases an order's in-flight claim when dropped, unless it is held.
struct InFlightClaim {
    claims: Arc<Mutex<HashSet<OrderId>>>,
    id: OrderId,
    held: bool,
}

impl InFlightClaim {
    fn acquire(claims: &Arc<Mutex<HashSet<OrderId>>>, id: OrderId) -> Result<Option<Self>> {
        let mut held = claims
            .lock()
            .map_err(|_| OrderflowError::internal("In-flight set lock poisoned"))?;
        if !held.insert(id) {
            return Ok(None);
        }
        Ok(Some(Self {
            claims: Arc::clone(claims),
            id,
            held: false,
        }))
    }

    /// Keeps the order claimed for the life of the orchestrator, so that it
    /// is never charged again by this process.
    fn hold(mut self) {
        self.held = true;
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        if self.held {
            return;
        }
        if let Ok(mut held) = self.claims.lock() {
            held.remove(&self.id);
        }
    }
}

/// Drives a `Pending` order to `Paid` or `Failed` with exactly one provider
/// call, then hands paid orders to the fan-out coordinator.
///
/// The store is only touched to read the order and to apply the transition;
/// the provider call itself runs outside any store lock. Provider declines,
/// errors, panics and timeouts all end in `Failed`.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    store: SharedOrderStore,
    providers: Arc<ProviderRegistry>,
    fan_out: Arc<FanOutCoordinator>,
    supervisor: Arc<TaskSupervisor>,
    in_flight: Arc<Mutex<HashSet<OrderId>>>,
    provider_timeout: Duration,
}

impl PaymentOrchestrator {
    pub fn new(
        store: SharedOrderStore,
        providers: Arc<ProviderRegistry>,
        fan_out: Arc<FanOutCoordinator>,
        supervisor: Arc<TaskSupervisor>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            providers,
            fan_out,
            supervisor,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            provider_timeout,
        }
    }

    /// Processes the payment of one order.
    ///
    /// Safe to call any number of times, concurrently or not: orders that are
    /// missing, already terminal, or currently being charged are skipped.
    /// Only storage failures are returned as errors.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn process(&self, id: OrderId) -> Result<ProcessOutcome> {
        let Some(claim) = InFlightClaim::acquire(&self.in_flight, id)? else {
            debug!("Order is already being charged");
            return Ok(ProcessOutcome::Skipped(SkipReason::InFlight));
        };

        let Some(order) = self.store.get(id).await? else {
            debug!("Order not found");
            return Ok(ProcessOutcome::Skipped(SkipReason::NotFound));
        };
        if order.is_terminal() {
            debug!(status = %order.status, "Order already processed");
            return Ok(ProcessOutcome::Skipped(SkipReason::AlreadyTerminal));
        }

        let charged = self.charge(order.payment_method, ChargeRequest::from(&order)).await;
        let (transition, outcome) = match charged {
            Ok(ChargeOutcome::Approved { transaction_id }) => (
                Transition::Paid {
                    transaction_id: transaction_id.clone(),
                },
                ProcessOutcome::Paid { transaction_id },
            ),
            Ok(ChargeOutcome::Declined { reason }) => {
                warn!(reason = %reason, "Payment declined");
                (Transition::Failed, ProcessOutcome::Failed { reason })
            }
            Err(err) => {
                warn!(error = %err, "Payment provider failed");
                (
                    Transition::Failed,
                    ProcessOutcome::Failed {
                        reason: err.to_string(),
                    },
                )
            }
        };

        let target = transition.target();
        let applied = match self.commit(id, transition).await {
            Ok(applied) => applied,
            Err(err) => {
                if let ProcessOutcome::Paid { transaction_id } = &outcome {
                    error!(
                        transaction_id = %transaction_id,
                        error = %err,
                        "Charge approved but not recorded; order held for reconciliation"
                    );
                    claim.hold();
                }
                return Err(err);
            }
        };
        if !applied {
            debug!("Order was terminated by another writer");
            return Ok(ProcessOutcome::Skipped(SkipReason::LostRace));
        }
        info!(status = %target, "Order transitioned");

        if matches!(outcome, ProcessOutcome::Paid { .. }) {
            self.schedule_fan_out(id).await?;
        }
        Ok(outcome)
    }

    /// Writes the transition, retrying storage errors a bounded number of
    /// times.
    async fn commit(&self, id: OrderId, transition: Transition) -> Result<bool> {
        let mut attempt = 1;
        loop {
            match self.store.transition(id, transition.clone()).await {
                Ok(applied) => return Ok(applied),
                Err(err) if attempt < TRANSITION_ATTEMPTS => {
                    warn!(attempt, error = %err, "Transition write failed, retrying");
                    tokio::time::sleep(TRANSITION_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Calls the provider on its own task so that a panic surfaces as an
    /// error, and bounds the call by the provider timeout.
    async fn charge(&self, method: PaymentMethod, request: ChargeRequest) -> Result<ChargeOutcome> {
        let provider = self.providers.get(method).ok_or_else(|| {
            OrderflowError::Adapter(format!("No provider configured for {method}"))
        })?;
        debug!(provider = provider.name(), amount = %request.amount, currency = %request.currency, "Charging");

        let mut call = tokio::spawn(async move { provider.charge(&request).await });
        match tokio::time::timeout(self.provider_timeout, &mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(OrderflowError::Adapter(format!(
                "provider call aborted: {join_err}"
            ))),
            Err(_) => {
                call.abort();
                Err(OrderflowError::Timeout {
                    operation: format!("{method} charge"),
                    after_ms: self.provider_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn schedule_fan_out(&self, id: OrderId) -> Result<()> {
        let Some(paid) = self.store.get(id).await? else {
            return Err(OrderflowError::NotFound(id));
        };
        let fan_out = Arc::clone(&self.fan_out);
        self.supervisor
            .spawn(format!("fan-out {id}"), async move {
                fan_out.run(paid).await.map(|_| ())
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::tests::sample_new_order;
    use crate::domain::order::{NewOrder, Order, OrderStatus};
    use crate::domain::ports::OrderStore;
    use crate::infrastructure::in_memory::InMemoryOrderStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::infrastructure::providers::{FailingProvider, ScriptedProvider, SlowProvider};

    struct Fixture {
        store: Arc<InMemoryOrderStore>,
        supervisor: Arc<TaskSupervisor>,
        fan_out: Arc<FanOutCoordinator>,
        orchestrator: PaymentOrchestrator,
    }

    fn fixture(provider: SharedProvider, timeout: Duration) -> Fixture {
        let store = Arc::new(InMemoryOrderStore::new());
        let supervisor = Arc::new(TaskSupervisor::new());
        let fan_out = Arc::new(FanOutCoordinator::new(Vec::new(), Duration::from_secs(1)));
        let orchestrator = PaymentOrchestrator::new(
            store.clone(),
            Arc::new(ProviderRegistry::uniform(provider)),
            fan_out.clone(),
            supervisor.clone(),
            timeout,
        );
        Fixture {
            store,
            supervisor,
            fan_out,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_approved_charge_marks_paid_and_fans_out() {
        let f = fixture(
            Arc::new(ScriptedProvider::approving("stripe", "T1")),
            Duration::from_secs(1),
        );
        let order = f.store.create(sample_new_order()).await.unwrap();

        let outcome = f.orchestrator.process(order.id).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Paid {
                transaction_id: "T1".to_string()
            }
        );

        let stored = f.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.amount, order.amount);
        assert_eq!(stored.currency, order.currency);

        f.supervisor.wait_idle().await;
        let reports = f.fan_out.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].order_id, order.id);
    }

    #[tokio::test]
    async fn test_declined_charge_marks_failed_without_fan_out() {
        let f = fixture(
            Arc::new(ScriptedProvider::declining("stripe")),
            Duration::from_secs(1),
        );
        let order = f.store.create(sample_new_order()).await.unwrap();

        let outcome = f.orchestrator.process(order.id).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { .. }));

        let stored = f.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
        assert_eq!(stored.transaction_id, None);
        assert_eq!(stored.paid_at, None);

        f.supervisor.wait_idle().await;
        assert!(f.fan_out.reports().await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_marks_failed() {
        let f = fixture(
            Arc::new(FailingProvider::new("stripe", "gateway down")),
            Duration::from_secs(1),
        );
        let order = f.store.create(sample_new_order()).await.unwrap();

        let outcome = f.orchestrator.process(order.id).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { reason } if reason.contains("gateway down")));
    }

    #[tokio::test]
    async fn test_provider_timeout_marks_failed() {
        let slow = SlowProvider::new(
            ScriptedProvider::approving("stripe", "late"),
            Duration::from_secs(30),
        );
        let f = fixture(Arc::new(slow), Duration::from_millis(50));
        let order = f.store.create(sample_new_order()).await.unwrap();

        let outcome = f.orchestrator.process(order.id).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { reason } if reason.contains("timed out")));
        let stored = f.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_provider_marks_failed() {
        let store = Arc::new(InMemoryOrderStore::new());
        let supervisor = Arc::new(TaskSupervisor::new());
        let registry = ProviderRegistry::new().with(
            PaymentMethod::PayPal,
            Arc::new(ScriptedProvider::approving("paypal", "P1")),
        );
        let orchestrator = PaymentOrchestrator::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(FanOutCoordinator::new(Vec::new(), Duration::from_secs(1))),
            supervisor,
            Duration::from_secs(1),
        );
        let order = store.create(sample_new_order()).await.unwrap();

        let outcome = orchestrator.process(order.id).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { reason } if reason.contains("No provider")));
    }

    #[tokio::test]
    async fn test_reprocessing_terminal_or_unknown_order_is_noop() {
        let provider = Arc::new(ScriptedProvider::approving("stripe", "T1"));
        let f = fixture(provider.clone(), Duration::from_secs(1));
        let order = f.store.create(sample_new_order()).await.unwrap();

        f.orchestrator.process(order.id).await.unwrap();
        let first = f.store.get(order.id).await.unwrap().unwrap();

        assert_eq!(
            f.orchestrator.process(order.id).await.unwrap(),
            ProcessOutcome::Skipped(SkipReason::AlreadyTerminal)
        );
        assert_eq!(
            f.orchestrator.process(OrderId::new()).await.unwrap(),
            ProcessOutcome::Skipped(SkipReason::NotFound)
        );
        assert_eq!(f.store.get(order.id).await.unwrap().unwrap(), first);
        assert_eq!(provider.calls(), 1);
    }

    /// Fails the first `failures` transition writes, then delegates.
    struct FlakyStore {
        inner: InMemoryOrderStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryOrderStore::new(),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl OrderStore for FlakyStore {
        async fn create(&self, new: NewOrder) -> Result<Order> {
            self.inner.create(new).await
        }

        async fn transition(&self, id: OrderId, transition: Transition) -> Result<bool> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(OrderflowError::internal("disk full"));
            }
            self.inner.transition(id, transition).await
        }

        async fn get(&self, id: OrderId) -> Result<Option<Order>> {
            self.inner.get(id).await
        }

        async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
            self.inner.by_status(status).await
        }

        async fn all(&self) -> Result<Vec<Order>> {
            self.inner.all().await
        }

        async fn paid_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>> {
            self.inner.paid_between(from, to).await
        }
    }

    fn flaky_fixture(store: Arc<FlakyStore>, provider: SharedProvider) -> PaymentOrchestrator {
        PaymentOrchestrator::new(
            store,
            Arc::new(ProviderRegistry::uniform(provider)),
            Arc::new(FanOutCoordinator::new(Vec::new(), Duration::from_secs(1))),
            Arc::new(TaskSupervisor::new()),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried_without_recharging() {
        let store = Arc::new(FlakyStore::new(1));
        let provider = Arc::new(ScriptedProvider::approving("stripe", "T1"));
        let orchestrator = flaky_fixture(store.clone(), provider.clone());
        let order = store.create(sample_new_order()).await.unwrap();

        let outcome = orchestrator.process(order.id).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Paid {
                transaction_id: "T1".to_string()
            }
        );
        assert_eq!(
            orchestrator.process(order.id).await.unwrap(),
            ProcessOutcome::Skipped(SkipReason::AlreadyTerminal)
        );
        assert_eq!(provider.calls(), 1);
        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.transaction_id.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_unrecorded_approval_holds_order_against_recharge() {
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let provider = Arc::new(ScriptedProvider::approving("stripe", "T1"));
        let orchestrator = flaky_fixture(store.clone(), provider.clone());
        let order = store.create(sample_new_order()).await.unwrap();

        assert!(orchestrator.process(order.id).await.is_err());
        assert_eq!(
            orchestrator.process(order.id).await.unwrap(),
            ProcessOutcome::Skipped(SkipReason::InFlight)
        );
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_unrecorded_decline_releases_order() {
        let store = Arc::new(FlakyStore::new(TRANSITION_ATTEMPTS as usize));
        let provider = Arc::new(ScriptedProvider::new(
            "stripe",
            vec![ChargeOutcome::Declined {
                reason: "insufficient funds".to_string(),
            }],
            ChargeOutcome::Approved {
                transaction_id: "T2".to_string(),
            },
        ));
        let orchestrator = flaky_fixture(store.clone(), provider.clone());
        let order = store.create(sample_new_order()).await.unwrap();

        assert!(orchestrator.process(order.id).await.is_err());
        assert_eq!(
            orchestrator.process(order.id).await.unwrap(),
            ProcessOutcome::Paid {
                transaction_id: "T2".to_string()
            }
        );
        assert_eq!(provider.calls(), 2);
    }
}
