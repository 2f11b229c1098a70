mod bus;
mod status;

pub use bus::{EventBus, SubscriptionToken};
pub use status::{NodeStatus, StatusMessage, StatusPublisher};
