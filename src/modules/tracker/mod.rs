pub mod models;
pub mod services;

pub use models::{TrackOptions, UsageRecord};
pub use services::{ExtractedUsage, GenericUsageExtractor, Tracker, UsageExtractor};
