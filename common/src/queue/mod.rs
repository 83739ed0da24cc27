// Queue module for NATS JetStream integration

pub mod broker;
pub mod messages;
pub mod nats;

pub use broker::{Broker, Destination};
pub use messages::RefreshRequest;
pub use nats::{NatsBroker, NatsClient};
