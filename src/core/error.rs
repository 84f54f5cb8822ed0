use crate::modules::limits::models::TriggeredLimit;

/// Crate-wide Result type
pub type AicmResult<T> = std::result::Result<T, AicmError>;

/// Main SDK error type
#[derive(thiserror::Error, Debug)]
pub enum AicmError {
    /// Required credential or path absent at construction
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// Server returned a non-2xx response; terminal at the call site
    #[error("HTTP {status}: {message}")]
    ApiRequest {
        status: u16,
        error: Option<String>,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// The pre-check matched one or more active `limit` thresholds.
    /// Carries the matching events so callers can show which limit fired.
    #[error("usage limit exceeded: {} matching limit(s)", .0.len())]
    UsageLimitExceeded(Vec<TriggeredLimit>),

    /// Immediate delivery got a 2xx but the server produced no cost events.
    /// Non-fatal; surfaced for visibility only.
    #[error("no cost events tracked for response {0}")]
    NoCostsTracked(String),

    /// Triggered-limits envelope failed signature or issuer verification.
    /// Only surfaced under the fail-closed decode policy.
    #[error("triggered limits payload could not be verified: {0}")]
    LimitVerification(String),

    /// Timestamp input could not be parsed as ISO-8601
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Record failed shape validation before enqueue
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Delivery gave up after exhausting retries
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Local queue database errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP transport errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Errors raised by the retry middleware stack
    #[error("HTTP middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem errors from the INI store or queue paths
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AicmError {
    pub fn missing_configuration(msg: impl Into<String>) -> Self {
        AicmError::MissingConfiguration(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        AicmError::Delivery(msg.into())
    }

    /// Build an [`AicmError::ApiRequest`] from a status code and the raw
    /// response body, extracting the server's `{error, message, details}`
    /// shape when the body is JSON.
    pub fn api_request(status: u16, body: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => {
                let message = map
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
                    .unwrap_or_else(|| body.to_owned());
                AicmError::ApiRequest {
                    status,
                    error: map.get("error").and_then(|v| v.as_str()).map(str::to_owned),
                    message,
                    details: map.get("details").cloned(),
                }
            }
            _ => AicmError::ApiRequest {
                status,
                error: None,
                message: body.to_owned(),
                details: None,
            },
        }
    }

    /// Whether the error is the non-fatal empty-cost-events condition.
    pub fn is_no_costs_tracked(&self) -> bool {
        matches!(self, AicmError::NoCostsTracked(_))
    }
}
