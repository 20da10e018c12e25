use crate::domain::order::NewOrder;
use crate::error::{OrderflowError, Result};
use std::io::Read;

/// Reads purchase intents from a CSV source.
///
/// Expects the header
/// `customer_email,customer_name,product_id,product_name,amount,currency,payment_method,affiliate_id,conversion_source`.
/// Optional columns may be left empty. Rows are only parsed here; field
/// validation happens when the order is created.
pub struct OrderReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OrderReader<R> {
    /// Creates a new `OrderReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes orders.
    pub fn orders(self) -> impl Iterator<Item = Result<NewOrder>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(OrderflowError::from))
    }
}
