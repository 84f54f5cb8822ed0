pub mod queue_repository;

pub use queue_repository::{QueueRepository, QueueRow};
