use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Lifecycle of a topic worker. No transition leads back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    Draining,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub restarts: u32,
    pub last_error: Option<String>,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: WorkerState::Running,
            restarts: 0,
            last_error: None,
        }
    }
}

/// Topic → status, written by the workers and read by the supervisor and tests
#[derive(Clone, Default)]
pub struct StatusRegistry {
    inner: Shared<HashMap<String, WorkerStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self {
            inner: new_state(HashMap::new()),
        }
    }

    pub fn set_state(&self, topic: &str, state: WorkerState) {
        self.inner.lock().entry(topic.to_string()).or_default().state = state;
    }

    pub fn record_failure(&self, topic: &str, error: impl ToString) {
        self.inner.lock().entry(topic.to_string()).or_default().last_error = Some(error.to_string());
    }

    pub fn record_restart(&self, topic: &str) {
        self.inner.lock().entry(topic.to_string()).or_default().restarts += 1;
    }

    pub fn get(&self, topic: &str) -> Option<WorkerStatus> {
        self.inner.lock().get(topic).cloned()
    }

    /// Sorted by topic
    pub fn snapshot(&self) -> Vec<(String, WorkerStatus)> {
        let mut all: Vec<_> = self
            .inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Topics whose worker has not reached `Closed`
    pub fn active(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|(_, s)| s.state != WorkerState::Closed)
            .map(|(topic, _)| topic)
            .collect()
    }
}
