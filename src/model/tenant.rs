//! Customer and Base catalog records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing identity owning one or more bases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub stripe_id: String,
    pub subscription_id: String,
    pub is_active: bool,
    pub created: DateTime<Utc>,
}

impl Customer {
    /// A not-yet-persisted, inactive customer.
    pub fn new(
        email: impl Into<String>,
        stripe_id: impl Into<String>,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            email: email.into().to_lowercase(),
            stripe_id: stripe_id.into(),
            subscription_id: subscription_id.into(),
            is_active: false,
            created: Utc::now(),
        }
    }
}

/// A tenant application. Its name is the physical partition key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Base {
    pub id: String,
    pub customer_id: String,
    pub name: String,
    pub allowed_domains: Vec<String>,
    pub is_active: bool,
    pub monthly_email_sent: i64,
    pub created: DateTime<Utc>,
}

impl Base {
    /// A not-yet-persisted base owned by `customer_id`.
    pub fn new(customer_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            customer_id: customer_id.into(),
            name: name.into(),
            allowed_domains: Vec::new(),
            is_active: false,
            monthly_email_sent: 0,
            created: Utc::now(),
        }
    }

    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = domains;
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }
}
