use serde_json::Value;

/// Usage pulled from a vendor-shaped response or stream event.
#[derive(Debug, Clone)]
pub struct ExtractedUsage {
    /// `"{vendor}::{model}"` when the response names its model.
    pub service_key: Option<String>,
    /// The vendor-shaped usage object, shipped opaquely.
    pub usage: Value,
    /// The vendor's own response id, reused for correlation when present.
    pub response_id: Option<String>,
}

/// Capability for pulling usage out of vendor response shapes.
///
/// Per-vendor adapters implement this instead of the SDK intercepting
/// client calls; the tracker depends only on this trait.
pub trait UsageExtractor: Send + Sync {
    /// Extract usage from a completed response, or `None` when the
    /// response carries none.
    fn extract(&self, api_id: &str, response: &Value) -> Option<ExtractedUsage>;

    /// Extract usage from one streaming event, or `None` when the event
    /// carries none. Called until the first hit, then never again for
    /// that stream.
    fn extract_stream_event(&self, api_id: &str, event: &Value) -> Option<ExtractedUsage>;
}

/// Shape-based extractor covering the common vendor layouts: `usage`,
/// `usage_metadata`, `usageMetadata`, `metadata.usage`, and (for streams)
/// the usage nested under a final `response` object.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericUsageExtractor;

impl GenericUsageExtractor {
    fn usage_from(value: &Value) -> Option<Value> {
        for key in ["usage", "usage_metadata", "usageMetadata"] {
            if let Some(usage) = non_empty_object(value.get(key)) {
                return Some(usage);
            }
        }
        if let Some(metadata) = value.get("metadata") {
            for key in ["usage", "usageMetadata"] {
                if let Some(usage) = non_empty_object(metadata.get(key)) {
                    return Some(usage);
                }
            }
        }
        None
    }

    fn model_from(value: &Value) -> Option<&str> {
        value
            .get("model")
            .and_then(Value::as_str)
            .filter(|model| !model.is_empty())
    }

    fn build(api_id: &str, source: &Value, usage: Value) -> ExtractedUsage {
        let vendor = vendor_prefix(api_id);
        let service_key =
            Self::model_from(source).map(|model| format!("{vendor}::{model}"));
        let response_id = source
            .get("id")
            .or_else(|| source.get("response_id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned);
        ExtractedUsage {
            service_key,
            usage,
            response_id,
        }
    }
}

impl UsageExtractor for GenericUsageExtractor {
    fn extract(&self, api_id: &str, response: &Value) -> Option<ExtractedUsage> {
        let usage = Self::usage_from(response)?;
        Some(Self::build(api_id, response, usage))
    }

    fn extract_stream_event(&self, api_id: &str, event: &Value) -> Option<ExtractedUsage> {
        if let Some(usage) = Self::usage_from(event) {
            return Some(Self::build(api_id, event, usage));
        }
        // Some vendors attach the usage to a final nested response frame.
        let response = event.get("response")?;
        let usage = Self::usage_from(response)?;
        Some(Self::build(api_id, response, usage))
    }
}

/// Vendor family of an api id: the part before the first underscore
/// (`openai_chat` tracks services priced under `openai`).
pub fn vendor_prefix(api_id: &str) -> &str {
    api_id.split('_').next().unwrap_or(api_id)
}

fn non_empty_object(value: Option<&Value>) -> Option<Value> {
    match value {
        Some(Value::Object(map)) if !map.is_empty() => Some(Value::Object(map.clone())),
        _ => None,
    }
}
