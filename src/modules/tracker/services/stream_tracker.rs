use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::modules::tracker::models::TrackOptions;
use crate::modules::tracker::services::tracker_service::Tracker;

/// Wrap a vendor event stream, yielding every event unchanged and firing
/// the tracker at most once when a usage-bearing event is observed.
///
/// Vendors disagree on where stream usage lives (the last event, a nested
/// `response.usage`, a metadata frame); the extractor probes each event
/// until it finds one. Errors from the enqueue, including an active usage
/// limit, are logged and swallowed so the caller's stream is undisturbed.
pub fn wrap<S>(
    tracker: Arc<Tracker>,
    api_id: String,
    stream: S,
    opts: TrackOptions,
) -> impl Stream<Item = serde_json::Value> + Send
where
    S: Stream<Item = serde_json::Value> + Send + 'static,
{
    async_stream::stream! {
        futures_util::pin_mut!(stream);
        let mut fired = false;
        while let Some(event) = stream.next().await {
            if !fired {
                if let Some(extracted) = tracker.extractor().extract_stream_event(&api_id, &event)
                {
                    fired = true;
                    let mut opts = opts.clone();
                    if opts.response_id.is_none() {
                        opts.response_id = extracted.response_id.clone();
                    }
                    let result = tracker
                        .track(
                            &api_id,
                            extracted.service_key.as_deref(),
                            extracted.usage,
                            opts,
                        )
                        .await;
                    if let Err(err) = result {
                        warn!(error = %err, api_id = %api_id, "stream usage tracking failed");
                    }
                }
            }
            yield event;
        }
    }
}
