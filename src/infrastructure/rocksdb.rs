use crate::domain::order::{NewOrder, Order, OrderId, OrderStatus, Transition};
use crate::domain::ports::OrderStore;
use crate::error::{OrderflowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing orders.
pub const CF_ORDERS: &str = "orders";

/// A persistent order store using RocksDB.
///
/// Orders are stored as JSON under their 16-byte id in the `orders` column
/// family. Writes go through a shared mutex so that a transition's
/// read-check-put sequence cannot interleave with another write.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbOrderStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbOrderStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the `orders` column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_orders = ColumnFamilyDescriptor::new(CF_ORDERS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_orders])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_ORDERS)
            .ok_or_else(|| OrderflowError::internal("Orders column family not found"))
    }

    fn read(&self, id: OrderId) -> Result<Option<Order>> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, id.0.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, order: &Order) -> Result<()> {
        let cf = self.cf()?;
        let value = serde_json::to_vec(order)?;
        self.db.put_cf(cf, order.id.0.as_bytes(), value)?;
        Ok(())
    }

    fn scan<F>(&self, mut keep: F) -> Result<Vec<Order>>
    where
        F: FnMut(&Order) -> bool,
    {
        let cf = self.cf()?;
        let mut orders = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let order: Order = serde_json::from_slice(&value)?;
            if keep(&order) {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }
}

#[async_trait]
impl OrderStore for RocksDbOrderStore {
    async fn create(&self, new: NewOrder) -> Result<Order> {
        let order = Order::create(new, Utc::now())?;
        let _guard = self.write_lock.lock().await;
        self.write(&order)?;
        Ok(order)
    }

    async fn transition(&self, id: OrderId, transition: Transition) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut order) = self.read(id)? else {
            return Ok(false);
        };
        if !order.apply(transition, Utc::now()) {
            return Ok(false);
        }
        self.write(&order)?;
        Ok(true)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.read(id)
    }

    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        self.scan(|order| order.status == status)
    }

    async fn all(&self) -> Result<Vec<Order>> {
        self.scan(|_| true)
    }

    async fn paid_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>> {
        self.scan(|order| {
            order.status == OrderStatus::Paid
                && order.paid_at.is_some_and(|at| at >= from && at < to)
        })
    }
}
