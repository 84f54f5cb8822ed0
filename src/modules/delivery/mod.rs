pub mod models;
pub mod repositories;
pub mod services;

pub use models::{
    DeliveryStats, EventOutcome, QueueHealth, QueueItem, QueueStatus, TrackResponse, TrackResult,
};
pub use services::{
    create_delivery, Delivery, DeliveryType, EnqueueOutcome, HttpDispatcher, ImmediateDelivery,
    MemQueueDelivery, PersistentDelivery, Shipper, TrackBody,
};
