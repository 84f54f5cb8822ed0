use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Parsed body of a successful `/track` response.
///
/// Per-record error strings inside `event_ids` are preserved exactly as the
/// server sent them. The `triggered_limits` envelope is kept as raw JSON so
/// it can be persisted verbatim.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackResponse {
    #[serde(default)]
    pub event_ids: Vec<HashMap<String, EventOutcome>>,
    #[serde(default)]
    pub results: Vec<TrackResult>,
    #[serde(default)]
    pub triggered_limits: Option<serde_json::Value>,
}

/// Per-record ingestion outcome: an event uuid on success, the server's
/// error-message list otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventOutcome {
    EventId(String),
    Errors(Vec<String>),
}

/// One entry of the optional `results` array.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackResult {
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cost_events: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub errors: Vec<String>,
}

impl TrackResponse {
    /// Look up the outcome recorded for a response id.
    pub fn outcome_for(&self, response_id: &str) -> Option<&EventOutcome> {
        self.event_ids
            .iter()
            .find_map(|entry| entry.get(response_id))
    }

    /// Error messages the server attached to a response id, if any.
    pub fn errors_for(&self, response_id: &str) -> Option<&[String]> {
        match self.outcome_for(response_id) {
            Some(EventOutcome::Errors(errors)) => Some(errors),
            _ => None,
        }
    }
}

impl TrackResult {
    /// Whether this result reports a successful ingestion with nothing to
    /// show for it: no cost events, no errors, and no async-processing
    /// status (`queued`/`completed` results produce events later).
    pub fn is_empty_success(&self) -> bool {
        self.cost_events.is_empty()
            && self.errors.is_empty()
            && !matches!(self.status.as_deref(), Some("queued") | Some("completed"))
    }
}

/// Older servers return `errors` as a bare string rather than a list.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(single)) => vec![single],
        Some(OneOrMany::Many(many)) => many,
    })
}
