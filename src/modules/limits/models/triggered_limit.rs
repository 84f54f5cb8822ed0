use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Threshold kind for a usage limit. Only `limit` blocks tracking;
/// `alert` thresholds are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    Alert,
    Limit,
}

/// Rolling window a limit amount applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        };
        f.write_str(name)
    }
}

/// Vendor-level scoping attached to a triggered limit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorScope {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config_ids: Option<Vec<String>>,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// A currently-active limit violation computed by the server, decoded from
/// the signed envelope. Amounts stay decimal end to end; the SDK does no
/// arithmetic on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredLimit {
    pub event_id: String,
    pub limit_id: String,
    pub threshold_type: ThresholdType,
    pub amount: Decimal,
    pub period: Period,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<VendorScope>,
    /// Legacy flat `"{vendor}::{service_id}"` form still emitted by older
    /// servers; split on demand for comparisons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_customer_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl TriggeredLimit {
    /// Whether this event gates tracking.
    pub fn blocks(&self) -> bool {
        self.threshold_type == ThresholdType::Limit
    }

    /// Service id scope, falling back to the legacy flat key.
    pub fn effective_service_id(&self) -> Option<&str> {
        self.service_id
            .as_deref()
            .or_else(|| self.legacy_parts().map(|parts| parts.service_id))
    }

    /// Vendor scope, falling back to the legacy flat key.
    pub fn effective_vendor(&self) -> Option<&str> {
        self.vendor
            .as_ref()
            .and_then(|scope| scope.name.as_deref())
            .or_else(|| self.legacy_parts().and_then(|parts| parts.vendor))
    }

    /// Whether this event applies to a record with the given service key.
    /// Vendor-only scope matches on vendor; service-id scope matches on the
    /// exact id; an event with neither matches everything.
    pub fn matches_service(&self, query: &ServiceKey<'_>) -> bool {
        let service_id = self.effective_service_id();
        let vendor = self.effective_vendor();
        if service_id.is_none() && vendor.is_none() {
            return true;
        }
        if service_id.is_some_and(|id| id == query.service_id) {
            return true;
        }
        vendor.is_some_and(|name| Some(name) == query.vendor)
    }

    fn legacy_parts(&self) -> Option<ServiceKey<'_>> {
        self.service_key.as_deref().map(ServiceKey::parse)
    }
}

/// A `"{vendor}::{service_id}"` key split for scope comparisons. Keys
/// without the separator are treated as a bare service id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceKey<'a> {
    pub vendor: Option<&'a str>,
    pub service_id: &'a str,
}

impl<'a> ServiceKey<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.split_once("::") {
            Some((vendor, service_id)) => Self {
                vendor: Some(vendor),
                service_id,
            },
            None => Self {
                vendor: None,
                service_id: raw,
            },
        }
    }
}
