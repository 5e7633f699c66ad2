//! Broker seam: one subscription per topic worker.
//!
//! A [`Subscription`] is owned by exactly one worker and is never shared.
//! Delivery is at-least-once: messages returned by `poll` are redelivered
//! unless `commit` is called after they were dispatched.

pub mod mqtt;

use crate::error::BrokerError;
use async_trait::async_trait;
use std::time::Duration;

pub use mqtt::MqttBroker;

/// One message as received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait Subscription: Send {
    fn topic(&self) -> &str;

    /// Waits at most `timeout` and returns the messages received in that
    /// window, in delivery order. An empty batch is not an error.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawMessage>, BrokerError>;

    /// Acknowledges every message returned by the previous `poll`.
    async fn commit(&mut self) -> Result<(), BrokerError>;

    /// Releases the subscription. Called once, when the worker stops.
    async fn close(&mut self);
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}
