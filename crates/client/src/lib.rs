//! # client - pipelined RESP2 connection
//!
//! One [`Connection`] wraps one transport. Commands are written in the
//! order they are sent and their replies are matched back in that order.
//! A connection can switch into publish/subscribe mode, where pushed
//! messages are delivered to the receivers registered with
//! [`Connection::subscribe`].

pub mod config;
mod connection;
mod driver;
mod error;
mod pubsub;

pub use config::ClientConfig;
pub use connection::Connection;
pub use error::ClientError;
pub use error::Result;
pub use pubsub::MessageReceiver;
pub use pubsub::PubSubMessage;
pub use pubsub::Subscriber;
pub use pubsub::SubscriptionChangeCallback;
pub use pubsub::SubscriptionTarget;
pub use pubsub::TargetKind;
pub use resp::RespValue;
