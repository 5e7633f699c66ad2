/*!
Broker en mémoire pour tester les TopicWorkers sans MQTT

Chaque topic a une file de messages en attente. Un `poll` livre tout ce qui
attend (ou attend jusqu'au timeout), les messages livrés restent "en vol"
jusqu'au `commit`. Une fermeture sans commit les remet en tête de file,
comme une redélivrance at-least-once.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use symbion_ingest::broker::{Broker, RawMessage, Subscription};
use symbion_ingest::error::BrokerError;
use tokio::sync::Notify;

#[derive(Default)]
struct TopicQueue {
    pending: VecDeque<Vec<u8>>,
    in_flight: Vec<Vec<u8>>,
    committed: Vec<Vec<u8>>,
    subscribes: usize,
    closes: usize,
    polls_started: usize,
    polls_completed: usize,
    poll_errors: usize,
    subscribe_errors: usize,
    hang_polls: bool,
    arrivals: Arc<Notify>,
}

/// Compteurs d'un topic (pour assertions de tests)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicCounters {
    pub pending: usize,
    pub in_flight: usize,
    pub committed: usize,
    pub subscribes: usize,
    pub closes: usize,
    pub polls_started: usize,
    pub polls_completed: usize,
}

#[derive(Clone, Default)]
pub struct MockBroker {
    topics: Arc<Mutex<HashMap<String, TopicQueue>>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simule la publication d'un message sur `topic`
    pub fn feed(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let arrivals = {
            let mut topics = self.topics.lock();
            let queue = topics.entry(topic.to_string()).or_default();
            queue.pending.push_back(payload.into());
            queue.arrivals.clone()
        };
        arrivals.notify_one();
        log::info!("📨 [MOCK] queued message on {}", topic);
    }

    /// Les `count` prochains polls de `topic` échouent avec une erreur de connexion
    pub fn fail_polls(&self, topic: &str, count: usize) {
        self.topics.lock().entry(topic.to_string()).or_default().poll_errors += count;
    }

    /// Les `count` prochains abonnements à `topic` échouent
    pub fn fail_subscribes(&self, topic: &str, count: usize) {
        self.topics.lock().entry(topic.to_string()).or_default().subscribe_errors += count;
    }

    /// Les polls de `topic` ne rendent plus jamais la main (broker figé)
    pub fn hang_polls(&self, topic: &str) {
        self.topics.lock().entry(topic.to_string()).or_default().hang_polls = true;
    }

    pub fn counters(&self, topic: &str) -> TopicCounters {
        let topics = self.topics.lock();
        match topics.get(topic) {
            Some(q) => TopicCounters {
                pending: q.pending.len(),
                in_flight: q.in_flight.len(),
                committed: q.committed.len(),
                subscribes: q.subscribes,
                closes: q.closes,
                polls_started: q.polls_started,
                polls_completed: q.polls_completed,
            },
            None => TopicCounters::default(),
        }
    }

    /// Payloads committés, dans l'ordre
    pub fn committed(&self, topic: &str) -> Vec<Vec<u8>> {
        self.topics
            .lock()
            .get(topic)
            .map(|q| q.committed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        {
            let mut topics = self.topics.lock();
            let queue = topics.entry(topic.to_string()).or_default();
            if queue.subscribe_errors > 0 {
                queue.subscribe_errors -= 1;
                return Err(BrokerError::Subscribe {
                    topic: topic.to_string(),
                    reason: "injected failure".into(),
                });
            }
            queue.subscribes += 1;
        }
        log::info!("📥 [MOCK] subscribed to {}", topic);
        Ok(Box::new(MockSubscription {
            topic: topic.to_string(),
            topics: Arc::clone(&self.topics),
        }))
    }
}

pub struct MockSubscription {
    topic: String,
    topics: Arc<Mutex<HashMap<String, TopicQueue>>>,
}

impl MockSubscription {
    fn take_pending(&self, queue: &mut TopicQueue) -> Vec<RawMessage> {
        let batch: Vec<Vec<u8>> = queue.pending.drain(..).collect();
        queue.in_flight.extend(batch.iter().cloned());
        batch
            .into_iter()
            .map(|payload| RawMessage::new(self.topic.clone(), payload))
            .collect()
    }
}

#[async_trait]
impl Subscription for MockSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawMessage>, BrokerError> {
        let (arrivals, hang) = {
            let mut topics = self.topics.lock();
            let queue = topics.entry(self.topic.clone()).or_default();
            queue.polls_started += 1;
            if queue.poll_errors > 0 {
                queue.poll_errors -= 1;
                queue.polls_completed += 1;
                return Err(BrokerError::Connection("injected failure".into()));
            }
            if !queue.pending.is_empty() {
                queue.polls_completed += 1;
                return Ok(self.take_pending(queue));
            }
            (queue.arrivals.clone(), queue.hang_polls)
        };

        if hang {
            log::warn!("🧊 [MOCK] poll on {} will never return", self.topic);
            std::future::pending::<()>().await;
        }

        let _ = tokio::time::timeout(timeout, arrivals.notified()).await;

        let mut topics = self.topics.lock();
        let queue = topics.entry(self.topic.clone()).or_default();
        queue.polls_completed += 1;
        Ok(self.take_pending(queue))
    }

    async fn commit(&mut self) -> Result<(), BrokerError> {
        let mut topics = self.topics.lock();
        let queue = topics.entry(self.topic.clone()).or_default();
        let done: Vec<Vec<u8>> = queue.in_flight.drain(..).collect();
        queue.committed.extend(done);
        Ok(())
    }

    async fn close(&mut self) {
        let mut topics = self.topics.lock();
        let queue = topics.entry(self.topic.clone()).or_default();
        // non committés: redélivrés au prochain abonnement
        let uncommitted: Vec<Vec<u8>> = queue.in_flight.drain(..).collect();
        for payload in uncommitted.into_iter().rev() {
            queue.pending.push_front(payload);
        }
        queue.closes += 1;
        log::info!("🔌 [MOCK] closed subscription {}", self.topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_commit_close() {
        let broker = MockBroker::new();
        broker.feed("app1", b"one".to_vec());
        broker.feed("app1", b"two".to_vec());

        let mut sub = broker.subscribe("app1").await.unwrap();
        let batch = sub.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, b"one");
        sub.commit().await.unwrap();

        broker.feed("app1", b"three".to_vec());
        let batch = sub.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 1);
        sub.close().await;

        let counters = broker.counters("app1");
        assert_eq!(counters.committed, 2);
        assert_eq!(counters.pending, 1, "uncommitted message is redelivered");
        assert_eq!(counters.closes, 1);
    }

    #[tokio::test]
    async fn test_empty_poll_waits_for_timeout() {
        let broker = MockBroker::new();
        let mut sub = broker.subscribe("idle").await.unwrap();
        let batch = sub.poll(Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(broker.counters("idle").polls_completed, 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let broker = MockBroker::new();
        broker.fail_subscribes("t", 1);
        assert!(broker.subscribe("t").await.is_err());

        broker.fail_polls("t", 1);
        let mut sub = broker.subscribe("t").await.unwrap();
        assert!(matches!(
            sub.poll(Duration::from_millis(5)).await,
            Err(BrokerError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_hung_poll_never_completes() {
        let broker = MockBroker::new();
        broker.hang_polls("stuck");
        let mut sub = broker.subscribe("stuck").await.unwrap();

        let polled = tokio::time::timeout(Duration::from_millis(50), sub.poll(Duration::from_millis(5))).await;
        assert!(polled.is_err());
        let counters = broker.counters("stuck");
        assert_eq!(counters.polls_started, 1);
        assert_eq!(counters.polls_completed, 0);
    }
}
