use crate::domain::money::Revenue;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{SharedOrderStore, day_bounds};
use crate::error::{OrderflowError, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GroupStats {
    pub count: usize,
    pub revenue: Revenue,
}

/// Paid orders grouped by an attribution key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AttributionReport {
    pub by_source: BTreeMap<String, GroupStats>,
    pub total_revenue: Revenue,
    pub total_orders: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyRevenue {
    pub date: NaiveDate,
    pub orders: usize,
    pub revenue: Revenue,
}

/// Read-only rollups computed on demand from the order store.
///
/// Each call reads whatever the store holds at that moment. Terminal order
/// fields never change, so no locking across orders is needed.
pub struct AnalyticsAggregator {
    store: SharedOrderStore,
    unattributed_label: String,
}

impl AnalyticsAggregator {
    pub fn new(store: SharedOrderStore, unattributed_label: impl Into<String>) -> Self {
        Self {
            store,
            unattributed_label: unattributed_label.into(),
        }
    }

    /// Sum of `amount` over orders paid on `date`.
    pub async fn daily_revenue(&self, date: NaiveDate) -> Result<Revenue> {
        self.store.revenue_for_day(date).await
    }

    /// Paid orders grouped by `conversion_source`.
    pub async fn conversion_analytics(&self) -> Result<AttributionReport> {
        self.group_paid(|order| order.conversion_source.as_deref())
            .await
    }

    /// Paid orders grouped by `affiliate_id`.
    pub async fn affiliate_analytics(&self) -> Result<AttributionReport> {
        self.group_paid(|order| order.affiliate_id.as_deref()).await
    }

    /// One entry per calendar day in `[from, to]`, including days without
    /// sales.
    pub async fn revenue_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyRevenue>> {
        if from > to {
            return Err(OrderflowError::validation(format!(
                "Invalid date range: {from} is after {to}"
            )));
        }
        let (start, _) = day_bounds(from);
        let (_, end) = day_bounds(to);
        let paid = self.store.paid_between(start, end).await?;

        let mut days: BTreeMap<NaiveDate, DailyRevenue> = from
            .iter_days()
            .take_while(|day| *day <= to)
            .map(|date| {
                (
                    date,
                    DailyRevenue {
                        date,
                        orders: 0,
                        revenue: Revenue::ZERO,
                    },
                )
            })
            .collect();

        for order in paid {
            let Some(paid_at) = order.paid_at else {
                continue;
            };
            if let Some(day) = days.get_mut(&paid_at.date_naive()) {
                day.orders += 1;
                day.revenue += order.amount;
            }
        }
        Ok(days.into_values().collect())
    }

    /// Number of orders in each status, including empty ones.
    pub async fn status_breakdown(&self) -> Result<BTreeMap<OrderStatus, usize>> {
        let mut counts: BTreeMap<OrderStatus, usize> = [
            (OrderStatus::Pending, 0),
            (OrderStatus::Paid, 0),
            (OrderStatus::Failed, 0),
        ]
        .into_iter()
        .collect();
        for order in self.store.all().await? {
            *counts.entry(order.status).or_default() += 1;
        }
        Ok(counts)
    }

    async fn group_paid<F>(&self, key: F) -> Result<AttributionReport>
    where
        F: Fn(&Order) -> Option<&str>,
    {
        let paid = self.store.by_status(OrderStatus::Paid).await?;
        let mut report = AttributionReport::default();
        for order in &paid {
            let label = key(order).unwrap_or(&self.unattributed_label).to_string();
            let group = report.by_source.entry(label).or_default();
            group.count += 1;
            group.revenue += order.amount;
            report.total_orders += 1;
            report.total_revenue += order.amount;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::Transition;
    use crate::domain::order::tests::sample_new_order;
    use crate::infrastructure::in_memory::InMemoryOrderStore;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn seed(
        store: &InMemoryOrderStore,
        amount: Decimal,
        source: Option<&str>,
        outcome: Transition,
        at: chrono::DateTime<Utc>,
    ) {
        let mut new = sample_new_order();
        new.amount = amount;
        new.conversion_source = source.map(str::to_string);
        let mut order = Order::create(new, at).unwrap();
        order.apply(outcome, at);
        store.insert(order).await;
    }

    fn paid() -> Transition {
        Transition::Paid {
            transaction_id: "T".to_string(),
        }
    }

    #[tokio::test]
    async fn test_daily_revenue_ignores_failed_orders() {
        let store = InMemoryOrderStore::new();
        let at = Utc.with_ymd_and_hms(2024, 5, 10, 9, 30, 0).unwrap();
        for amount in [dec!(10.00), dec!(20.00), dec!(5.00)] {
            seed(&store, amount, None, paid(), at).await;
        }
        seed(&store, dec!(99.00), None, Transition::Failed, at).await;

        let analytics = AnalyticsAggregator::new(Arc::new(store), "unknown");
        let revenue = analytics
            .daily_revenue(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap())
            .await
            .unwrap();
        assert_eq!(revenue.value(), dec!(35.00));
    }

    #[tokio::test]
    async fn test_conversion_grouping_with_unknown_source() {
        let store = InMemoryOrderStore::new();
        let at = Utc::now();
        for (source, amount) in [
            (Some("ads"), dec!(10)),
            (Some("ads"), dec!(20)),
            (Some("email"), dec!(30)),
            (None, dec!(40)),
        ] {
            seed(&store, amount, source, paid(), at).await;
        }

        let analytics = AnalyticsAggregator::new(Arc::new(store), "unknown");
        let report = analytics.conversion_analytics().await.unwrap();

        let group = |name: &str| report.by_source[name];
        assert_eq!(group("ads").count, 2);
        assert_eq!(group("ads").revenue.value(), dec!(30));
        assert_eq!(group("email").count, 1);
        assert_eq!(group("email").revenue.value(), dec!(30));
        assert_eq!(group("unknown").count, 1);
        assert_eq!(group("unknown").revenue.value(), dec!(40));
        assert_eq!(report.total_revenue.value(), dec!(100));
        assert_eq!(report.total_orders, 4);
    }

    #[tokio::test]
    async fn test_revenue_between_fills_empty_days() {
        let store = InMemoryOrderStore::new();
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap();
        let third = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        seed(&store, dec!(12.5), None, paid(), first).await;
        seed(&store, dec!(7.5), None, paid(), third).await;
        seed(&store, dec!(1), None, paid(), Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap()).await;

        let analytics = AnalyticsAggregator::new(Arc::new(store), "unknown");
        let series = analytics
            .revenue_between(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            )
            .await
            .unwrap();

        let revenue: Vec<_> = series.iter().map(|d| (d.orders, d.revenue.value())).collect();
        assert_eq!(revenue, vec![(1, dec!(12.5)), (0, dec!(0)), (1, dec!(7.5))]);
    }

    #[tokio::test]
    async fn test_revenue_between_rejects_inverted_range() {
        let analytics = AnalyticsAggregator::new(Arc::new(InMemoryOrderStore::new()), "unknown");
        let result = analytics
            .revenue_between(
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            )
            .await;
        assert!(matches!(result, Err(OrderflowError::Validation(_))));
    }

    #[tokio::test]
    async fn test_status_breakdown_counts_every_status() {
        let store = InMemoryOrderStore::new();
        seed(&store, dec!(1), None, paid(), Utc::now()).await;
        seed(&store, dec!(1), None, Transition::Failed, Utc::now()).await;
        seed(&store, dec!(1), None, Transition::Failed, Utc::now()).await;

        let analytics = AnalyticsAggregator::new(Arc::new(store), "unknown");
        let counts = analytics.status_breakdown().await.unwrap();
        assert_eq!(counts[&OrderStatus::Pending], 0);
        assert_eq!(counts[&OrderStatus::Paid], 1);
        assert_eq!(counts[&OrderStatus::Failed], 2);
    }

    #[tokio::test]
    async fn test_affiliate_grouping() {
        let store = InMemoryOrderStore::new();
        let mut new = sample_new_order();
        new.affiliate_id = Some("aff-7".to_string());
        let mut order = Order::create(new, Utc::now()).unwrap();
        order.apply(paid(), Utc::now());
        store.insert(order).await;
        seed(&store, dec!(5), None, paid(), Utc::now()).await;

        let analytics = AnalyticsAggregator::new(Arc::new(store), "unknown");
        let report = analytics.affiliate_analytics().await.unwrap();
        assert_eq!(report.by_source["aff-7"].revenue.value(), dec!(50.00));
        assert_eq!(report.by_source["unknown"].count, 1);
    }
}
