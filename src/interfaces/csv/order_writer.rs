use crate::domain::order::Order;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct OrderRow<'a> {
    id: String,
    customer_email: &'a str,
    product_id: &'a str,
    amount: String,
    currency: &'a str,
    payment_method: &'a str,
    status: &'a str,
    transaction_id: Option<&'a str>,
    paid_at: Option<String>,
    conversion_source: Option<&'a str>,
}

impl<'a> From<&'a Order> for OrderRow<'a> {
    fn from(order: &'a Order) -> Self {
        Self {
            id: order.id.to_string(),
            customer_email: order.customer_email.as_str(),
            product_id: &order.product_id,
            amount: order.amount.to_string(),
            currency: order.currency.code(),
            payment_method: order.payment_method.as_str(),
            status: order.status.as_str(),
            transaction_id: order.transaction_id.as_deref(),
            paid_at: order.paid_at.map(|at| at.to_rfc3339()),
            conversion_source: order.conversion_source.as_deref(),
        }
    }
}

/// Writes final order states as CSV.
pub struct OrderWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OrderWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_orders<'a, I>(&mut self, orders: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Order>,
    {
        for order in orders {
            self.writer.serialize(OrderRow::from(order))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
