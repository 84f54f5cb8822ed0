pub mod stream_tracker;
pub mod tracker_service;
pub mod usage_extractor;

pub use tracker_service::Tracker;
pub use usage_extractor::{ExtractedUsage, GenericUsageExtractor, UsageExtractor};
