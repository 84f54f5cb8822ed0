pub mod triggered_limit;
pub mod usage_limit;

pub use triggered_limit::{Period, ServiceKey, ThresholdType, TriggeredLimit, VendorScope};
pub use usage_limit::{UsageLimitIn, UsageLimitOut};
