pub mod queue_item;
pub mod track_response;

pub use queue_item::{DeliveryStats, QueueHealth, QueueItem, QueueStatus};
pub use track_response::{EventOutcome, TrackResponse, TrackResult};
