//! # Worker supervisor.
//!
//! Owns one actor per configured topic plus the two shared background pools,
//! and tears everything down on shutdown.
//!
//! ```text
//! run_until(signal)
//!   start()  ─► per topic: tracker.spawn(actor(child_token)), keep its AbortHandle
//!   select! { signal, all actors exited }
//!   shutdown():
//!     token.cancel()                       (workers finish their current poll)
//!     timeout(grace, tracker.wait())       ├─ Err ─► abort each actor, RuntimeError::GraceExceeded
//!     persistence.shutdown(grace) ‖ notifier.shutdown(grace)
//!     log stats
//!
//! actor(topic):
//!   loop {
//!     subscribe ─► FileSink::open ─► TopicWorker::run
//!       ├─ Ok (cancelled)             ─► break
//!       ├─ UnsupportedType            ─► break
//!       └─ Err + RestartPolicy::Never ─► break
//!          Err + OnFailure            ─► sleep(backoff.next(n)) unless cancelled, loop
//!   }
//! ```
//!
//! Shutdown runs once; later calls return the first report.

use crate::broker::Broker;
use crate::config::{IngestConfig, TopicConf};
use crate::error::{DispatchError, RuntimeError, WorkerError};
use crate::file_sink::FileSink;
use crate::handlers::{AlertMatcher, RecordHandler, Services};
use crate::notifier::{AlertTransport, NotifierSettings, RateLimitedNotifier};
use crate::policies::{BackoffPolicy, RestartPolicy};
use crate::pool::{DrainOutcome, TaskPool};
use crate::sinks::Sinks;
use crate::state::{StatusRegistry, WorkerState};
use crate::stats::{IngestStats, StatsSnapshot};
use crate::worker::{TopicWorker, WorkerSettings};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Single worker so that alerts reach the rate limiter one at a time
const NOTIFIER_POOL_SIZE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorSettings {
    pub worker: WorkerSettings,
    pub restart: RestartPolicy,
    pub backoff: BackoffPolicy,
    pub grace: Duration,
    pub persistence_workers: usize,
}

impl From<&IngestConfig> for SupervisorSettings {
    fn from(cfg: &IngestConfig) -> Self {
        Self {
            worker: WorkerSettings {
                poll_timeout: cfg.poll_timeout(),
                reconnect_delay: Duration::from_millis(cfg.pipeline.reconnect_delay_ms),
                failure_policy: cfg.pipeline.failure_policy,
            },
            restart: cfg.pipeline.restart.policy,
            backoff: cfg.pipeline.restart.backoff(),
            grace: cfg.shutdown_grace(),
            persistence_workers: cfg.pipeline.persistence_workers,
        }
    }
}

/// What shutdown found
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    pub persistence: DrainOutcome,
    pub notifier: DrainOutcome,
    pub stats: StatsSnapshot,
}

pub struct WorkerSupervisor {
    broker: Arc<dyn Broker>,
    topics: Vec<TopicConf>,
    settings: SupervisorSettings,
    services: Services,
    status: StatusRegistry,
    token: CancellationToken,
    workers: TaskTracker,
    aborts: Mutex<Vec<AbortHandle>>,
    started: AtomicBool,
    report: OnceCell<Result<ShutdownReport, RuntimeError>>,
}

impl WorkerSupervisor {
    pub fn new(
        cfg: &IngestConfig,
        broker: Arc<dyn Broker>,
        sinks: Sinks,
        transport: Arc<dyn AlertTransport>,
    ) -> Self {
        let settings = SupervisorSettings::from(cfg);
        let notifier = RateLimitedNotifier::new(transport, NotifierSettings::from(&cfg.notifier));
        let services = Services {
            sinks,
            notifier: Arc::new(notifier),
            persistence_pool: Arc::new(TaskPool::new("persistence", settings.persistence_workers)),
            notifier_pool: Arc::new(TaskPool::new("notifier", NOTIFIER_POOL_SIZE)),
            matcher: Arc::new(AlertMatcher::new(&cfg.alert_keywords)),
            stats: IngestStats::new(),
        };

        Self {
            broker,
            topics: cfg.topics.clone(),
            settings,
            services,
            status: StatusRegistry::new(),
            token: CancellationToken::new(),
            workers: TaskTracker::new(),
            aborts: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            report: OnceCell::new(),
        }
    }

    pub fn status(&self) -> StatusRegistry {
        self.status.clone()
    }

    pub fn stats(&self) -> IngestStats {
        self.services.stats.clone()
    }

    /// Spawns one actor per topic. Only the first call has an effect.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.token.is_cancelled() {
            self.workers.close();
            return;
        }
        let mut aborts = self.aborts.lock();
        for topic in &self.topics {
            self.status.set_state(&topic.topic, WorkerState::Running);
            let actor = TopicActor {
                topic: topic.clone(),
                broker: Arc::clone(&self.broker),
                settings: self.settings,
                services: self.services.clone(),
                status: self.status.clone(),
            };
            let handle = self.workers.spawn(actor.run(self.token.child_token()));
            aborts.push(handle.abort_handle());
        }
        self.workers.close();
        info!(topics = self.topics.len(), "topic workers started");
    }

    /// Resolves once every actor has exited. Holds no lock, so shutdown may run meanwhile.
    pub async fn wait_workers(&self) {
        self.workers.wait().await;
    }

    /// Starts the workers and runs until `signal` resolves or every worker is gone
    pub async fn run_until<F>(&self, signal: F) -> Result<ShutdownReport, RuntimeError>
    where
        F: Future<Output = ()>,
    {
        self.start().await;
        tokio::select! {
            _ = signal => info!("shutdown requested"),
            _ = self.wait_workers() => warn!("all topic workers exited"),
        }
        self.shutdown().await
    }

    pub async fn shutdown(&self) -> Result<ShutdownReport, RuntimeError> {
        self.report.get_or_init(|| self.shutdown_inner()).await.clone()
    }

    async fn shutdown_inner(&self) -> Result<ShutdownReport, RuntimeError> {
        let grace = self.settings.grace;
        self.token.cancel();
        self.workers.close();

        let workers = match tokio::time::timeout(grace, self.workers.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let stuck = self.status.active();
                for handle in self.aborts.lock().drain(..) {
                    handle.abort();
                }
                self.workers.wait().await;
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };
        if let Err(e) = &workers {
            error!(label = e.as_label(), "{e}");
        }

        let (persistence, notifier) = tokio::join!(
            self.services.persistence_pool.shutdown(grace),
            self.services.notifier_pool.shutdown(grace),
        );
        for (pool, outcome) in [("persistence", persistence), ("notifier", notifier)] {
            if let DrainOutcome::Forced { abandoned } = outcome {
                warn!(pool, abandoned, "background tasks abandoned after grace period");
            }
        }

        let stats = self.services.stats.snapshot();
        match serde_json::to_string(&stats) {
            Ok(line) => info!(stats = %line, "ingest stopped"),
            Err(_) => info!(?stats, "ingest stopped"),
        }

        workers.map(|()| ShutdownReport {
            persistence,
            notifier,
            stats,
        })
    }
}

/// Supervises one topic across restarts
struct TopicActor {
    topic: TopicConf,
    broker: Arc<dyn Broker>,
    settings: SupervisorSettings,
    services: Services,
    status: StatusRegistry,
}

impl TopicActor {
    async fn run(self, token: CancellationToken) {
        let name = self.topic.topic.clone();
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                break;
            }
            let err = match self.run_once(&token).await {
                Ok(()) => break,
                Err(e) => e,
            };

            error!(topic = %name, label = err.as_label(), "topic worker stopped: {err}");
            self.status.record_failure(&name, &err);
            if !self.should_restart(&err) || token.is_cancelled() {
                break;
            }

            let delay = self.settings.backoff.next(attempt);
            attempt = attempt.saturating_add(1);
            self.status.record_restart(&name);
            warn!(topic = %name, ?delay, attempt, "restarting topic worker after backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => break,
            }
        }
        self.status.set_state(&name, WorkerState::Closed);
    }

    async fn run_once(&self, token: &CancellationToken) -> Result<(), WorkerError> {
        let topic = &self.topic.topic;
        let subscription = self
            .broker
            .subscribe(topic)
            .await
            .map_err(|source| WorkerError::Subscribe {
                topic: topic.clone(),
                source,
            })?;

        let file = FileSink::open(&self.topic.output).await;
        let handler = RecordHandler::new(
            topic.clone(),
            self.topic.record_type.clone(),
            file,
            self.services.clone(),
        );
        let worker = TopicWorker::new(
            subscription,
            handler,
            self.settings.worker,
            self.status.clone(),
            self.services.stats.clone(),
        );
        worker.run(token.clone()).await
    }

    /// A misconfigured record type fails the same way every time, so it is never retried
    fn should_restart(&self, err: &WorkerError) -> bool {
        let misconfigured = matches!(
            err,
            WorkerError::Dispatch {
                source: DispatchError::UnsupportedType(_),
                ..
            }
        );
        self.settings.restart == RestartPolicy::OnFailure && !misconfigured
    }
}
