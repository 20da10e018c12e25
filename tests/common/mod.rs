#![allow(dead_code)]

use orderflow::domain::order::NewOrder;
use rust_decimal::Decimal;
use std::io::{Error, Write};
use tempfile::NamedTempFile;

pub const HEADER: &str = "customer_email,customer_name,product_id,product_name,amount,currency,payment_method,affiliate_id,conversion_source";

pub fn new_order(amount: Decimal, method: &str, source: Option<&str>) -> NewOrder {
    NewOrder {
        customer_email: "a@b.com".to_string(),
        customer_name: Some("Ada".to_string()),
        product_id: "X".to_string(),
        product_name: "Product X".to_string(),
        amount,
        currency: "EUR".to_string(),
        payment_method: method.to_string(),
        affiliate_id: None,
        conversion_source: source.map(str::to_string),
    }
}

/// Writes an orders CSV with the standard header followed by `rows`.
pub fn orders_csv(rows: &[&str]) -> Result<NamedTempFile, Error> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{HEADER}")?;
    for row in rows {
        writeln!(file, "{row}")?;
    }
    file.flush()?;
    Ok(file)
}
