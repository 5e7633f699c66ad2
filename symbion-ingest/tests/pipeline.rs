//! End-to-end pipeline scenarios against the devkit doubles.

use std::sync::Arc;
use std::time::Duration;
use symbion_devkit::{IngestMessageBuilder, TestHarness};
use symbion_ingest::error::{NotifyError, RuntimeError};
use symbion_ingest::file_sink::{format_local, LINE_SEPARATOR};
use symbion_ingest::models::{parse_instant, ServerStorageSnapshot};
use symbion_ingest::policies::{FailurePolicy, RestartPolicy};
use symbion_ingest::pool::DrainOutcome;
use symbion_ingest::state::{StatusRegistry, WorkerState};

const SCENARIO_A: &str = r#"{"topic":"app1","timestamp":"2024-01-01T00:00:00Z","serverName":"host1","path":"/var/log/app.log","message":"disk failure detected"}"#;

fn closed(status: &StatusRegistry, topic: &str) -> bool {
    status
        .get(topic)
        .map(|s| s.state == WorkerState::Closed)
        .unwrap_or(false)
}

/// Closed and the failure already recorded by the supervisor
fn failed(status: &StatusRegistry, topic: &str) -> bool {
    closed(status, topic) && status.get(topic).map(|s| s.last_error.is_some()).unwrap_or(false)
}

#[tokio::test]
async fn test_scenario_a_log_alert() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .with_keywords(&["failure"]);
    let sup = harness.supervisor().unwrap();
    harness.broker.feed("app1", SCENARIO_A);
    sup.start().await;

    let stores = harness.stores.clone();
    let transport = harness.transport.clone();
    assert!(
        harness
            .wait_until(3000, || stores.alerts().len() == 1 && transport.delivered().len() == 1)
            .await
    );

    let at = parse_instant("2024-01-01T00:00:00Z").unwrap();
    let expected = format!("{} [host1] disk failure detected{}", format_local(&at), LINE_SEPARATOR);
    assert_eq!(harness.read_output("app1"), expected);

    let alert = &harness.stores.alerts()[0];
    assert_eq!(alert.server_name, "host1");
    assert_eq!(alert.path, "/var/log/app.log");
    assert_eq!(alert.timestamp, at);

    let text = &harness.transport.delivered()[0];
    assert!(text.starts_with("ALERT\n Time: "));
    assert!(text.ends_with(" Message: disk failure detected"));

    let report = sup.shutdown().await.unwrap();
    assert_eq!(report.stats.consumed, 1);
    assert_eq!(report.stats.alerts_raised, 1);
    assert_eq!(harness.transport.attempts().len(), 1);
    assert_eq!(harness.broker.counters("app1").committed, 1);
}

#[tokio::test]
async fn test_non_matching_log_raises_nothing() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .with_keywords(&["FAILURE", "oom"]);
    let sup = harness.supervisor().unwrap();
    harness.feed_json("app1", &IngestMessageBuilder::log_now("app1", "host1", "all systems nominal"));
    harness.feed_json("app1", &IngestMessageBuilder::log_now("app1", "host1", "Disk Failure on sdb"));
    sup.start().await;

    let broker = harness.broker.clone();
    assert!(harness.wait_until(3000, || broker.counters("app1").committed == 2).await);
    let transport = harness.transport.clone();
    assert!(harness.wait_until(3000, || transport.delivered().len() == 1).await);

    sup.shutdown().await.unwrap();
    assert_eq!(harness.stores.alerts().len(), 1);
    assert_eq!(harness.stores.alerts()[0].message, "Disk Failure on sdb");
    assert_eq!(harness.transport.attempts().len(), 1);
    assert_eq!(harness.read_output("app1").lines().count(), 2);
}

#[tokio::test]
async fn test_scenario_b_metric_rows_share_parent() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("storage", "METRIC", true)
        .unwrap();
    let sup = harness.supervisor().unwrap();
    let payload = IngestMessageBuilder::storage_snapshot(
        "db01",
        "2024-01-01T00:00:00Z",
        &[("/", 1000, 250), ("/data", 4000, 3000)],
    );
    harness.feed_json("storage", &payload);
    sup.start().await;

    let stores = harness.stores.clone();
    assert!(harness.wait_until(3000, || stores.usages().len() == 2).await);
    sup.shutdown().await.unwrap();

    let snapshots = harness.stores.snapshots();
    assert_eq!(snapshots.len(), 1);
    let parent = snapshots[0].0;
    let usages = harness.stores.usages();
    assert!(usages.iter().all(|(id, _)| *id == parent));
    let mut paths: Vec<_> = usages.iter().map(|(_, u)| u.path.clone()).collect();
    paths.sort();
    assert_eq!(paths, vec!["/".to_string(), "/data".to_string()]);

    let mirrored: ServerStorageSnapshot = serde_json::from_str(harness.read_output("storage").trim()).unwrap();
    assert_eq!(mirrored.server_name, "db01");
    assert_eq!(mirrored.mount_path_storage_usages.len(), 2);
    assert!(harness.read_output("storage").contains("\n  \"systemId\""));
}

#[tokio::test]
async fn test_every_snapshot_gets_its_own_children() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("storage", "METRIC", false)
        .unwrap();
    let sup = harness.supervisor().unwrap();
    for n in 0..4usize {
        let mounts: Vec<(&str, i64, i64)> = ["/", "/a", "/b", "/c"][..n].iter().map(|p| (*p, 100, 10)).collect();
        harness.feed_json(
            "storage",
            &IngestMessageBuilder::storage_snapshot("db01", "2024-01-01T00:00:00Z", &mounts),
        );
    }
    sup.start().await;

    let stores = harness.stores.clone();
    assert!(harness.wait_until(3000, || stores.snapshots().len() == 4 && stores.usages().len() == 6).await);
    sup.shutdown().await.unwrap();

    for (id, snapshot) in harness.stores.snapshots() {
        let children = harness.stores.usages().iter().filter(|(p, _)| *p == id).count();
        assert_eq!(children, snapshot.mount_path_storage_usages.len());
    }
}

#[tokio::test]
async fn test_scenario_c_bad_timestamp_stops_only_that_topic() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .with_topic("app2", "LOG", true)
        .unwrap()
        .with_keywords(&["failure"]);
    let sup = harness.supervisor().unwrap();
    let status = sup.status();
    harness.broker.feed("app1", SCENARIO_A.replace("2024-01-01T00:00:00Z", "yesterday"));
    sup.start().await;

    assert!(harness.wait_until(3000, || failed(&status, "app1")).await);

    harness.feed_json("app2", &IngestMessageBuilder::log_now("app2", "host2", "disk failure"));
    let stores = harness.stores.clone();
    assert!(harness.wait_until(3000, || stores.alerts().len() == 1).await);
    assert_eq!(status.get("app2").unwrap().state, WorkerState::Running);

    let report = sup.shutdown().await.unwrap();
    assert_eq!(report.stats.decode_failures, 1);
    assert_eq!(harness.read_output("app1"), "");
    assert_eq!(harness.stores.alerts()[0].server_name, "host2");

    let app1 = harness.broker.counters("app1");
    assert_eq!(app1.closes, 1);
    assert_eq!(app1.committed, 0);
    assert_eq!(app1.pending, 1, "bad message stays on the broker");
}

#[tokio::test]
async fn test_scenario_d_unsupported_type_is_never_restarted() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("traces", "TRACE", true)
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .configure(|cfg| {
            cfg.pipeline.restart.policy = RestartPolicy::OnFailure;
            cfg.pipeline.restart.first_backoff_ms = 10;
        });
    let sup = harness.supervisor().unwrap();
    let status = sup.status();
    harness.broker.feed("traces", SCENARIO_A);
    sup.start().await;

    assert!(harness.wait_until(3000, || failed(&status, "traces")).await);
    let err = status.get("traces").unwrap().last_error.unwrap();
    assert!(err.contains("unsupported record type: TRACE"), "{err}");

    harness.feed_json("app1", &IngestMessageBuilder::log_now("app1", "host1", "still alive"));
    let broker = harness.broker.clone();
    assert!(harness.wait_until(3000, || broker.counters("app1").committed == 1).await);

    sup.shutdown().await.unwrap();
    assert_eq!(harness.broker.counters("traces").subscribes, 1);
    assert_eq!(status.get("traces").unwrap().restarts, 0);
}

#[tokio::test]
async fn test_skip_policy_continues_past_bad_payload() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .configure(|cfg| cfg.pipeline.failure_policy = FailurePolicy::Skip);
    let sup = harness.supervisor().unwrap();
    harness.broker.feed("app1", "{not json");
    harness.feed_json("app1", &IngestMessageBuilder::log_now("app1", "host1", "after the bad one"));
    sup.start().await;

    let broker = harness.broker.clone();
    assert!(harness.wait_until(3000, || broker.counters("app1").committed == 2).await);
    assert_eq!(sup.status().get("app1").unwrap().state, WorkerState::Running);

    let report = sup.shutdown().await.unwrap();
    assert_eq!(report.stats.decode_failures, 1);
    assert!(harness.read_output("app1").contains("after the bad one"));
    assert_eq!(harness.broker.committed("app1")[0], b"{not json");
}

#[tokio::test]
async fn test_restart_on_failure_resubscribes() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .configure(|cfg| {
            cfg.pipeline.restart.policy = RestartPolicy::OnFailure;
            cfg.pipeline.restart.first_backoff_ms = 20;
            cfg.pipeline.restart.max_backoff_ms = 40;
        });
    let sup = harness.supervisor().unwrap();
    let status = sup.status();
    harness.broker.fail_subscribes("app1", 1);
    sup.start().await;

    let broker = harness.broker.clone();
    assert!(harness.wait_until(3000, || broker.counters("app1").subscribes == 1).await);
    harness.feed_json("app1", &IngestMessageBuilder::log_now("app1", "host1", "back online"));
    assert!(harness.wait_until(3000, || broker.counters("app1").committed == 1).await);

    let app1 = status.get("app1").unwrap();
    assert_eq!(app1.restarts, 1);
    assert!(app1.last_error.unwrap().contains("subscribe to app1 failed"));
    sup.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_output_file_is_never_created() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", false)
        .unwrap()
        .with_keywords(&["failure"]);
    let sup = harness.supervisor().unwrap();
    harness.broker.feed("app1", SCENARIO_A);
    sup.start().await;

    let stores = harness.stores.clone();
    assert!(harness.wait_until(3000, || stores.alerts().len() == 1).await);
    sup.shutdown().await.unwrap();
    assert!(!harness.output_path("app1").exists());
}

#[tokio::test]
async fn test_transient_poll_errors_are_not_fatal() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap();
    let sup = harness.supervisor().unwrap();
    harness.broker.fail_polls("app1", 3);
    harness.feed_json("app1", &IngestMessageBuilder::log_now("app1", "host1", "after reconnect"));
    sup.start().await;

    let broker = harness.broker.clone();
    assert!(harness.wait_until(3000, || broker.counters("app1").committed == 1).await);
    assert_eq!(sup.status().get("app1").unwrap().state, WorkerState::Running);
    assert_eq!(harness.broker.counters("app1").subscribes, 1);
    sup.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_persistence_failure_is_contained() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("storage", "METRIC", true)
        .unwrap();
    harness.stores.fail_snapshots(true);
    let sup = harness.supervisor().unwrap();
    let snap = IngestMessageBuilder::storage_snapshot("db01", "2024-01-01T00:00:00Z", &[("/", 10, 1)]);
    harness.feed_json("storage", &snap);
    harness.feed_json("storage", &snap);
    sup.start().await;

    let stats = sup.stats();
    assert!(harness.wait_until(3000, || stats.snapshot().persistence_failures == 2).await);
    assert!(harness.stores.usages().is_empty());
    assert_eq!(sup.status().get("storage").unwrap().state, WorkerState::Running);
    sup.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_database_does_not_stall_polling() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("storage", "METRIC", true)
        .unwrap();
    harness.stores.set_delay(Duration::from_millis(500));
    let sup = harness.supervisor().unwrap();
    for _ in 0..5 {
        harness.feed_json(
            "storage",
            &IngestMessageBuilder::storage_snapshot("db01", "2024-01-01T00:00:00Z", &[]),
        );
    }
    sup.start().await;

    let broker = harness.broker.clone();
    assert!(harness.wait_until(400, || broker.counters("storage").committed == 5).await);
    assert!(harness.stores.snapshots().is_empty(), "inserts still in flight");

    let report = sup.shutdown().await.unwrap();
    assert_eq!(report.persistence, DrainOutcome::Drained);
    assert_eq!(harness.stores.snapshots().len(), 5);
}

#[tokio::test]
async fn test_grace_exceeded_abandons_background_tasks() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("storage", "METRIC", true)
        .unwrap()
        .configure(|cfg| cfg.pipeline.shutdown_grace_secs = 1);
    harness.stores.set_delay(Duration::from_secs(30));
    let sup = harness.supervisor().unwrap();
    harness.feed_json(
        "storage",
        &IngestMessageBuilder::storage_snapshot("db01", "2024-01-01T00:00:00Z", &[]),
    );
    sup.start().await;

    let broker = harness.broker.clone();
    assert!(harness.wait_until(3000, || broker.counters("storage").committed == 1).await);

    let report = sup.shutdown().await.unwrap();
    assert_eq!(report.persistence, DrainOutcome::Forced { abandoned: 1 });
    assert_eq!(report.notifier, DrainOutcome::Drained);
    assert!(harness.stores.snapshots().is_empty());
}

#[tokio::test]
async fn test_notifier_retries_then_drops() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .with_keywords(&["failure"]);
    harness.transport.script([
        Err(NotifyError::Timeout("read".into())),
        Err(NotifyError::Timeout("read".into())),
        Err(NotifyError::Timeout("read".into())),
        Err(NotifyError::Rejected {
            status: 400,
            reason: "Bad Request".into(),
        }),
    ]);
    let sup = harness.supervisor().unwrap();
    harness.broker.feed("app1", SCENARIO_A);
    harness.broker.feed("app1", SCENARIO_A);
    sup.start().await;

    let transport = harness.transport.clone();
    assert!(harness.wait_until(3000, || transport.attempts().len() == 4).await);
    let report = sup.shutdown().await.unwrap();

    assert_eq!(report.stats.notifications_dropped, 2);
    assert_eq!(report.stats.notifications_delivered, 0);
    assert_eq!(harness.transport.attempts().len(), 4, "3 attempts, then 1 for the rejection");
    assert_eq!(harness.stores.alerts().len(), 2, "alert rows do not depend on delivery");
}

#[tokio::test]
async fn test_alert_store_outage_still_notifies() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .with_keywords(&["failure"]);
    harness.stores.fail_alerts(true);
    let sup = harness.supervisor().unwrap();
    harness.broker.feed("app1", SCENARIO_A);
    sup.start().await;

    let transport = harness.transport.clone();
    let stats = sup.stats();
    assert!(
        harness
            .wait_until(3000, || transport.delivered().len() == 1 && stats.snapshot().persistence_failures == 1)
            .await
    );
    assert_eq!(sup.status().get("app1").unwrap().state, WorkerState::Running);

    let report = sup.shutdown().await.unwrap();
    assert_eq!(report.stats.notifications_delivered, 1);
    assert!(harness.stores.alerts().is_empty());
    assert!(harness.transport.delivered()[0].ends_with(" Message: disk failure detected"));
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_finishes_polls() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .with_topic("storage", "METRIC", true)
        .unwrap();
    let sup = harness.supervisor().unwrap();
    sup.start().await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    let first = sup.shutdown().await.unwrap();
    let second = sup.shutdown().await.unwrap();
    assert_eq!(first, second);

    for topic in ["app1", "storage"] {
        let c = harness.broker.counters(topic);
        assert_eq!(c.polls_started, c.polls_completed, "{topic}: poll abandoned mid-flight");
        assert_eq!(c.closes, 1);
        assert!(closed(&sup.status(), topic));
    }
}

#[tokio::test]
async fn test_run_until_returns_when_all_workers_exit() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("traces", "AUDIT", true)
        .unwrap();
    let sup = harness.supervisor().unwrap();
    harness.broker.feed("traces", SCENARIO_A);

    let report = tokio::time::timeout(Duration::from_secs(5), sup.run_until(std::future::pending()))
        .await
        .expect("supervisor should stop once its only worker is dead")
        .unwrap();
    assert_eq!(report.stats.consumed, 1);
    assert!(closed(&sup.status(), "traces"));
}

#[tokio::test]
async fn test_shutdown_from_another_task_honours_grace() {
    let harness = TestHarness::new()
        .unwrap()
        .with_topic("app1", "LOG", true)
        .unwrap()
        .configure(|cfg| cfg.pipeline.shutdown_grace_secs = 1);
    harness.broker.hang_polls("app1");
    let sup = Arc::new(harness.supervisor().unwrap());

    let runner = Arc::clone(&sup);
    let running = tokio::spawn(async move { runner.run_until(std::future::pending()).await });
    let broker = harness.broker.clone();
    assert!(harness.wait_until(3000, || broker.counters("app1").polls_started == 1).await);

    let result = tokio::time::timeout(Duration::from_secs(5), sup.shutdown())
        .await
        .expect("shutdown must give up on a hung worker after its grace period");
    match result {
        Err(RuntimeError::GraceExceeded { stuck, .. }) => assert_eq!(stuck, vec!["app1".to_string()]),
        other => panic!("expected GraceExceeded, got {other:?}"),
    }

    let from_runner = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run_until should return once the hung actor is aborted")
        .unwrap();
    assert!(matches!(from_runner, Err(RuntimeError::GraceExceeded { .. })));
    assert_eq!(harness.broker.counters("app1").polls_completed, 0);
}
