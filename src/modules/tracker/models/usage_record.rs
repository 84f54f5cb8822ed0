use serde::{Deserialize, Serialize};

use crate::core::error::{AicmError, AicmResult};
use crate::core::ids;
use crate::core::time::{self, Timestamp};

/// Caller-supplied options for a single track call.
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Correlation/idempotency id; generated when absent.
    pub response_id: Option<String>,
    /// Record instant; defaults to now (UTC).
    pub timestamp: Option<Timestamp>,
    /// End-customer scope attached to the record.
    pub client_customer_key: Option<String>,
    /// Opaque caller metadata shipped alongside the usage payload.
    pub context: Option<serde_json::Value>,
}

impl TrackOptions {
    pub fn response_id(mut self, response_id: impl Into<String>) -> Self {
        self.response_id = Some(response_id.into());
        self
    }

    pub fn timestamp(mut self, timestamp: impl Into<Timestamp>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn client_customer_key(mut self, key: impl Into<String>) -> Self {
        self.client_customer_key = Some(key.into());
        self
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// One tracked API call's usage payload plus identity and scoping: the unit
/// of delivery.
///
/// Optional fields serialize only when present; the server distinguishes an
/// absent field from an explicit null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub api_id: String,
    pub response_id: String,
    pub timestamp: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_customer_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl UsageRecord {
    /// Assemble a canonical record: validate identity fields, normalize the
    /// timestamp and drop empty optionals.
    pub fn build(
        api_id: &str,
        service_key: Option<&str>,
        usage: serde_json::Value,
        opts: TrackOptions,
    ) -> AicmResult<Self> {
        if api_id.is_empty() {
            return Err(AicmError::InvalidRecord("api_id must not be empty".into()));
        }
        if !usage.is_object() {
            return Err(AicmError::InvalidRecord(
                "usage payload must be a JSON object".into(),
            ));
        }
        if let Some(context) = &opts.context {
            if !context.is_object() {
                return Err(AicmError::InvalidRecord(
                    "context must be a JSON object".into(),
                ));
            }
        }

        let response_id = opts
            .response_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(ids::response_id);
        let timestamp = match opts.timestamp {
            Some(input) => time::normalize(input)?,
            None => time::now_formatted(),
        };

        Ok(Self {
            api_id: api_id.to_owned(),
            response_id,
            timestamp,
            payload: usage,
            service_key: service_key
                .filter(|key| !key.is_empty())
                .map(str::to_owned),
            client_customer_key: opts.client_customer_key.filter(|key| !key.is_empty()),
            context: opts.context,
        })
    }
}
