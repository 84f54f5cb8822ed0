use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::error::{AicmError, AicmResult};
use crate::modules::limits::models::{ServiceKey, TriggeredLimit};
use crate::modules::store::IniStore;

/// Issuer every limits envelope must be signed by.
const EXPECTED_ISSUER: &str = "aicm-api";

/// What `query` does when an envelope fails signature or issuer
/// verification. The default mirrors the server SDKs: an undecodable
/// envelope enforces nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitDecodePolicy {
    /// Verification failure behaves as an empty limit set.
    #[default]
    FailOpen,
    /// Verification failure surfaces [`AicmError::LimitVerification`] so
    /// callers can treat unknown state as blocking.
    FailClosed,
}

/// Read-through cache over the `[triggered_limits]` section of the shared
/// INI file. Envelopes are stored verbatim and decoded on every read, so
/// concurrent processes always see the last written limit set.
#[derive(Debug, Clone)]
pub struct TriggeredLimitsCache {
    ini: IniStore,
    policy: LimitDecodePolicy,
}

#[derive(Debug, Deserialize)]
struct EnvelopeClaims {
    #[serde(default)]
    triggered_limits: Vec<serde_json::Value>,
}

impl TriggeredLimitsCache {
    pub fn new(ini: IniStore, policy: LimitDecodePolicy) -> Self {
        Self { ini, policy }
    }

    pub fn ini(&self) -> &IniStore {
        &self.ini
    }

    /// Overwrite the cached envelope. The envelope is persisted exactly as
    /// received; the cache never re-signs or edits it.
    pub fn write(&self, envelope: &serde_json::Value) -> AicmResult<()> {
        self.ini
            .set("triggered_limits", "payload", &envelope.to_string())
    }

    /// Return the cached envelope, or `None` when nothing has been stored
    /// or the stored text is not JSON.
    pub fn read(&self) -> AicmResult<Option<serde_json::Value>> {
        match self.ini.get("triggered_limits", "payload")? {
            Some(text) if !text.is_empty() => Ok(serde_json::from_str(&text).ok()),
            _ => Ok(None),
        }
    }

    /// Verify and decode the cached envelope, then return the events that
    /// match the given scope. An absent or empty envelope yields no events.
    pub fn query(
        &self,
        api_key_id: Option<&str>,
        service_key: Option<&str>,
        customer_key: Option<&str>,
    ) -> AicmResult<Vec<TriggeredLimit>> {
        let Some(envelope) = self.read()? else {
            return Ok(Vec::new());
        };
        let token = envelope.get("encrypted_payload").and_then(|v| v.as_str());
        let public_key = envelope.get("public_key").and_then(|v| v.as_str());
        let (Some(token), Some(public_key)) = (token, public_key) else {
            return Ok(Vec::new());
        };

        let claims = match decode_claims(token, public_key) {
            Ok(claims) => claims,
            Err(err) => {
                return match self.policy {
                    LimitDecodePolicy::FailOpen => {
                        debug!(error = %err, "triggered limits envelope rejected, enforcing nothing");
                        Ok(Vec::new())
                    }
                    LimitDecodePolicy::FailClosed => {
                        Err(AicmError::LimitVerification(err.to_string()))
                    }
                };
            }
        };

        let service = service_key.map(ServiceKey::parse);
        let mut matches = Vec::new();
        for value in claims.triggered_limits {
            let event: TriggeredLimit = match serde_json::from_value(value) {
                Ok(event) => event,
                Err(err) => {
                    debug!(error = %err, "skipping malformed triggered limit event");
                    continue;
                }
            };
            if let Some(key_id) = api_key_id {
                if event.api_key_id.as_deref() != Some(key_id) {
                    continue;
                }
            }
            if let Some(service) = &service {
                if !event.matches_service(service) {
                    continue;
                }
            }
            if let Some(customer) = customer_key {
                if event.client_customer_key.as_deref() != Some(customer) {
                    continue;
                }
            }
            matches.push(event);
        }
        Ok(matches)
    }

    /// Pre-check used by the delivery path: returns the matching blocking
    /// events, logging any matching alert thresholds along the way.
    pub fn blocking_matches(
        &self,
        api_key_id: Option<&str>,
        service_key: Option<&str>,
        customer_key: Option<&str>,
    ) -> AicmResult<Vec<TriggeredLimit>> {
        let matches = self.query(api_key_id, service_key, customer_key)?;
        let (blocking, alerts): (Vec<_>, Vec<_>) =
            matches.into_iter().partition(TriggeredLimit::blocks);
        for alert in &alerts {
            warn!(
                limit_id = %alert.limit_id,
                service_id = alert.effective_service_id().unwrap_or("-"),
                "usage alert threshold active"
            );
        }
        Ok(blocking)
    }
}

fn decode_claims(
    token: &str,
    public_key_pem: &str,
) -> Result<EnvelopeClaims, jsonwebtoken::errors::Error> {
    let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())?;
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[EXPECTED_ISSUER]);
    // Envelopes carry iat/jti but no exp; freshness is the server's concern.
    validation.validate_exp = false;
    validation.required_spec_claims.remove("exp");
    let data = jsonwebtoken::decode::<EnvelopeClaims>(token, &key, &validation)?;
    Ok(data.claims)
}
