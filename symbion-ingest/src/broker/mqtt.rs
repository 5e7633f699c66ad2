use super::{Broker, RawMessage, Subscription};
use crate::config::BrokerConf;
use crate::error::BrokerError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

/// Upper bound on one poll batch, keeps pending acks below the request channel capacity
const MAX_BATCH: usize = 256;
const REQUEST_CAPACITY: usize = 1024;
const DISCONNECT_WAIT: Duration = Duration::from_millis(500);

/// MQTT broker: one client connection per subscribed topic
pub struct MqttBroker {
    conf: BrokerConf,
}

impl MqttBroker {
    pub fn new(conf: BrokerConf) -> Self {
        Self { conf }
    }

    pub fn client_id(&self, topic: &str) -> String {
        format!("{}-{}", self.conf.client_id_prefix, topic)
    }

    fn options(&self, topic: &str) -> MqttOptions {
        let mut opts = MqttOptions::new(self.client_id(topic), self.conf.host.clone(), self.conf.port);
        opts.set_keep_alive(Duration::from_secs(self.conf.keep_alive_secs));
        // persistent session + manual acks: unacked publishes come back after a restart
        opts.set_clean_session(false);
        opts.set_manual_acks(true);
        opts
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let (client, eventloop) = AsyncClient::new(self.options(topic), REQUEST_CAPACITY);
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        info!(topic, client_id = %self.client_id(topic), "mqtt subscription requested");

        Ok(Box::new(MqttSubscription {
            topic: topic.to_string(),
            client,
            eventloop,
            unacked: Vec::new(),
        }))
    }
}

pub struct MqttSubscription {
    topic: String,
    client: AsyncClient,
    eventloop: EventLoop,
    unacked: Vec<Publish>,
}

#[async_trait]
impl Subscription for MqttSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&mut self, wait: Duration) -> Result<Vec<RawMessage>, BrokerError> {
        let deadline = Instant::now() + wait;
        let mut batch = Vec::new();

        while batch.len() < MAX_BATCH {
            match timeout_at(deadline, self.eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    batch.push(RawMessage::new(publish.topic.clone(), publish.payload.to_vec()));
                    self.unacked.push(publish);
                }
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    debug!(topic = %self.topic, session_present = ack.session_present, "mqtt connected");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    // not acked, so the broker redelivers them after reconnecting
                    self.unacked.clear();
                    return Err(BrokerError::Connection(e.to_string()));
                }
            }
        }
        Ok(batch)
    }

    async fn commit(&mut self) -> Result<(), BrokerError> {
        for publish in self.unacked.drain(..) {
            self.client
                .ack(&publish)
                .await
                .map_err(|e| BrokerError::Commit(e.to_string()))?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.client.disconnect().await.is_err() {
            return;
        }
        // the disconnect request only leaves once the event loop is driven
        let _ = timeout(DISCONNECT_WAIT, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        debug!(topic = %self.topic, "mqtt subscription closed");
    }
}
