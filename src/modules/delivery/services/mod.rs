pub mod delivery_trait;
pub mod dispatcher;
pub mod factory;
pub mod immediate;
pub mod mem_queue;
pub mod persistent;
pub mod shipper;

pub use delivery_trait::{Delivery, DeliveryType, EnqueueOutcome, TrackBody};
pub use dispatcher::HttpDispatcher;
pub use factory::create_delivery;
pub use immediate::ImmediateDelivery;
pub use mem_queue::MemQueueDelivery;
pub use persistent::PersistentDelivery;
pub use shipper::Shipper;
