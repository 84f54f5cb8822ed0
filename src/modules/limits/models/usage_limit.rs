use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::triggered_limit::{Period, ThresholdType};

/// Request body for creating or updating a usage limit definition.
#[derive(Debug, Clone, Serialize)]
pub struct UsageLimitIn {
    pub threshold_type: ThresholdType,
    pub amount: Decimal,
    pub period: Period,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// End-customer scope (the record-side `client_customer_key`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

impl UsageLimitIn {
    pub fn new(threshold_type: ThresholdType, amount: Decimal, period: Period) -> Self {
        Self {
            threshold_type,
            amount,
            period,
            vendor: None,
            service: None,
            client: None,
        }
    }
}

/// A usage limit definition as returned by the management endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageLimitOut {
    pub uuid: String,
    pub threshold_type: ThresholdType,
    pub amount: Decimal,
    pub period: Period,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub active: bool,
}
