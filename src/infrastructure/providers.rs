//! Payment provider adapters.
//!
//! Real network integrations live outside this crate. The adapters here cover
//! local runs (`SimulatedProvider`) and deterministic doubles for tests.

use crate::domain::ports::{ChargeOutcome, ChargeRequest, PaymentProvider};
use crate::error::{OrderflowError, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

fn new_reference(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Approves each charge with a fixed probability after a simulated latency.
pub struct SimulatedProvider {
    name: String,
    success_rate: f64,
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>, success_rate: f64) -> Self {
        Self {
            name: name.into(),
            success_rate: success_rate.clamp(0.0, 1.0),
            latency: Duration::from_millis(20),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Uses a fixed seed so that runs are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn roll(&self) -> Result<bool> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| OrderflowError::internal("Provider RNG lock poisoned"))?;
        Ok(rng.gen_bool(self.success_rate))
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome> {
        let approved = self.roll()?;
        tokio::time::sleep(self.latency).await;
        debug!(provider = %self.name, order_id = %request.order_id, approved, "Simulated charge");
        if approved {
            Ok(ChargeOutcome::Approved {
                transaction_id: new_reference(&self.name),
            })
        } else {
            Ok(ChargeOutcome::Declined {
                reason: "Simulated decline".to_string(),
            })
        }
    }
}

/// Replays a fixed sequence of outcomes, then repeats the fallback.
///
/// Also counts how many charges it has received.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<ChargeOutcome>>,
    fallback: ChargeOutcome,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, script: Vec<ChargeOutcome>, fallback: ChargeOutcome) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Approves every charge with the same transaction reference.
    pub fn approving(name: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::new(
            name,
            Vec::new(),
            ChargeOutcome::Approved {
                transaction_id: transaction_id.into(),
            },
        )
    }

    /// Declines every charge.
    pub fn declining(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Vec::new(),
            ChargeOutcome::Declined {
                reason: "Card declined".to_string(),
            },
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn charge(&self, _request: &ChargeRequest) -> Result<ChargeOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|_| OrderflowError::internal("Provider script lock poisoned"))?
            .pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Fails every charge with a provider error.
pub struct FailingProvider {
    name: String,
    message: String,
}

impl FailingProvider {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl PaymentProvider for FailingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn charge(&self, _request: &ChargeRequest) -> Result<ChargeOutcome> {
        Err(OrderflowError::Adapter(self.message.clone()))
    }
}

/// Delegates to another provider after a fixed delay.
pub struct SlowProvider<P> {
    inner: P,
    delay: Duration,
}

impl<P: PaymentProvider> SlowProvider<P> {
    pub fn new(inner: P, delay: Duration) -> Self {
        Self { inner, delay }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: PaymentProvider> PaymentProvider for SlowProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome> {
        tokio::time::sleep(self.delay).await;
        self.inner.charge(request).await
    }
}
