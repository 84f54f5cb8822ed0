pub mod error;
pub mod ids;
pub mod time;

pub use error::{AicmError, AicmResult};
pub use time::Timestamp;
