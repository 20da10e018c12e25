use super::money::{Amount, Currency};
use crate::error::OrderflowError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque order identifier, assigned once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

fn valid_domain_label(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_alphanumeric() || c == '-')
}

/// Buyer e-mail address, trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn new(raw: &str) -> Result<Self, OrderflowError> {
        let email = raw.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && domain.split('.').all(valid_domain_label)
                    && !email.contains(char::is_whitespace)
            }
            None => false,
        };
        if valid {
            Ok(Self(email))
        } else {
            Err(OrderflowError::validation(format!(
                "Invalid email address '{}'",
                raw.trim()
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Email {
    type Error = OrderflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of payment providers an order can be charged through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Stripe,
    PayPal,
    Generic,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [Self::Stripe, Self::PayPal, Self::Generic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::PayPal => "paypal",
            Self::Generic => "generic",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = OrderflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(Self::Stripe),
            "paypal" => Ok(Self::PayPal),
            "generic" => Ok(Self::Generic),
            other => Err(OrderflowError::validation(format!(
                "Unknown payment method '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one status change an order may undergo after creation.
///
/// A successful payment always carries the provider's reference, which keeps
/// `transaction_id` present exactly when the order is `Paid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Paid { transaction_id: String },
    Failed,
}

impl Transition {
    pub fn target(&self) -> OrderStatus {
        match self {
            Self::Paid { .. } => OrderStatus::Paid,
            Self::Failed => OrderStatus::Failed,
        }
    }
}

/// Unvalidated purchase intent, as received from a caller.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct NewOrder {
    pub customer_email: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub product_id: String,
    pub product_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    #[serde(default)]
    pub affiliate_id: Option<String>,
    #[serde(default)]
    pub conversion_source: Option<String>,
}

/// A purchase intent and its payment outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_email: Email,
    pub customer_name: Option<String>,
    pub product_id: String,
    pub product_name: String,
    pub amount: Amount,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub affiliate_id: Option<String>,
    pub conversion_source: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Order {
    /// Validates a purchase intent and builds the `Pending` order for it.
    pub fn create(new: NewOrder, created_at: DateTime<Utc>) -> Result<Self, OrderflowError> {
        let product_id = new.product_id.trim().to_string();
        if product_id.is_empty() {
            return Err(OrderflowError::validation("Product id must not be empty"));
        }
        let product_name = new.product_name.trim().to_string();
        if product_name.is_empty() {
            return Err(OrderflowError::validation("Product name must not be empty"));
        }

        Ok(Self {
            id: OrderId::new(),
            customer_email: Email::new(&new.customer_email)?,
            customer_name: non_blank(new.customer_name),
            product_id,
            product_name,
            amount: Amount::new(new.amount)?,
            currency: Currency::new(&new.currency)?,
            payment_method: new.payment_method.parse()?,
            status: OrderStatus::Pending,
            transaction_id: None,
            created_at,
            paid_at: None,
            affiliate_id: non_blank(new.affiliate_id),
            conversion_source: non_blank(new.conversion_source),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies `transition` if the order is still `Pending`.
    ///
    /// Returns `false` and leaves the order untouched when it is already
    /// terminal.
    pub fn apply(&mut self, transition: Transition, at: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        match transition {
            Transition::Paid { transaction_id } => {
                self.status = OrderStatus::Paid;
                self.transaction_id = Some(transaction_id);
                self.paid_at = Some(at);
            }
            Transition::Failed => {
                self.status = OrderStatus::Failed;
            }
        }
        true
    }

    pub fn description(&self) -> String {
        format!("{} ({})", self.product_name, self.product_id)
    }
}
