//! Integration tests for threshold alerting: hysteresis, per-mount disk
//! handling, and the suspension and suppression gates.

mod common;

use common::*;
use monitor::alerts::engine::AlertState;
use monitor::cache::keys;
use monitor::database::hosts::ThresholdUpdate;
use monitor::database::AlertStatus;

#[tokio::test]
async fn test_cpu_spike_triggers_and_resolves_once() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    // cpu_threshold is 80 by default
    let series = [40.0, 42.0, 45.0, 92.0, 94.0, 93.0, 50.0, 48.0];
    for cpu in series {
        let sample = stack
            .database
            .insert_sample(host.id, &new_sample(cpu, 40.0))
            .await
            .unwrap();
        stack
            .alert_engine
            .evaluate_and_send(&host, &sample)
            .await
            .unwrap();
    }

    let history = stack.database.alert_history(host.id, 100).await.unwrap();
    let cpu_events: Vec<_> = history.iter().filter(|r| r.alert_type == "CPU").collect();

    assert_eq!(
        cpu_events.len(),
        2,
        "sustained breach must produce exactly one triggered and one resolved event"
    );

    let resolved = &cpu_events[0]; // history is newest first
    let triggered = &cpu_events[1];

    assert_eq!(triggered.status, AlertStatus::Triggered);
    assert_eq!(triggered.value, 92.0);
    assert_eq!(triggered.threshold, 80.0);

    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.value, 50.0);
    assert_eq!(resolved.threshold, 80.0);
    assert!(resolved.resolved_at.is_some());
}

#[tokio::test]
async fn test_disk_alert_dedupe_per_mountpoint() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    // disk_threshold is 90 by default; /var sits above it twice
    for percent in [92.0, 93.0] {
        let sample = stack
            .database
            .insert_sample(host.id, &sample_with_disk(10.0, 40.0, "/var", percent))
            .await
            .unwrap();
        stack
            .alert_engine
            .evaluate_and_send(&host, &sample)
            .await
            .unwrap();
    }

    let history = stack.database.alert_history(host.id, 100).await.unwrap();
    let disk_triggered: Vec<_> = history
        .iter()
        .filter(|r| r.alert_type == "Disk" && r.status == AlertStatus::Triggered)
        .collect();
    assert_eq!(disk_triggered.len(), 1, "second breach must not re-trigger");
    assert_eq!(disk_triggered[0].value, 92.0);

    let state: AlertState = stack
        .cache
        .get(&keys::alert_state(host.id))
        .await
        .expect("alert state cached");
    assert_eq!(state.disk.get("/var"), Some(&true));

    // Drop below, then rise again: one resolved, one fresh trigger
    for percent in [85.0, 95.0] {
        let sample = stack
            .database
            .insert_sample(host.id, &sample_with_disk(10.0, 40.0, "/var", percent))
            .await
            .unwrap();
        stack
            .alert_engine
            .evaluate_and_send(&host, &sample)
            .await
            .unwrap();
    }

    let history = stack.database.alert_history(host.id, 100).await.unwrap();
    let disk_events: Vec<_> = history.iter().filter(|r| r.alert_type == "Disk").collect();
    assert_eq!(disk_events.len(), 3);
    assert_eq!(disk_events[0].status, AlertStatus::Triggered);
    assert_eq!(disk_events[0].value, 95.0);
    assert_eq!(disk_events[1].status, AlertStatus::Resolved);
}

#[tokio::test]
async fn test_suppressed_alerts_skip_evaluation() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    stack
        .database
        .set_alerts_suppressed(host.id, true)
        .await
        .unwrap();

    let sample = stack
        .database
        .insert_sample(host.id, &new_sample(99.0, 40.0))
        .await
        .unwrap();
    stack
        .alert_engine
        .evaluate_and_send(&host, &sample)
        .await
        .unwrap();

    assert!(stack
        .database
        .alert_history(host.id, 100)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_suspended_host_writes_nothing_on_tick() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    // Seed history so detection has data, then suspend
    backfill_cpu_series(
        &stack.database,
        &host,
        &(0..12).map(|_| (20.0, 50.0)).collect::<Vec<_>>(),
        30,
    )
    .await;
    stack.database.set_suspended(host.id, true).await.unwrap();

    let samples_before = stack.database.recent_samples(host.id, 1000).await.unwrap().len();

    // A full scheduler tick over every job class
    stack.scheduler.collect_all_once().await;
    stack.scheduler.detect_all_once().await;
    stack.scheduler.service_check_once().await;

    let samples_after = stack.database.recent_samples(host.id, 1000).await.unwrap().len();
    assert_eq!(samples_before, samples_after, "no samples while suspended");
    assert_eq!(
        stack.database.unresolved_count(host.id).await.unwrap(),
        0,
        "no anomalies while suspended"
    );
    assert!(
        stack
            .database
            .alert_history(host.id, 100)
            .await
            .unwrap()
            .is_empty(),
        "no alert records while suspended"
    );

    let status = stack.status_calculator.status(host.id).await.unwrap();
    assert_eq!(status, monitor::heartbeat::HostStatus::Offline);
}

#[tokio::test]
async fn test_threshold_update_applies_to_next_evaluation() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let sample = stack
        .database
        .insert_sample(host.id, &new_sample(75.0, 40.0))
        .await
        .unwrap();

    // 75% is below the default 80 threshold
    stack
        .alert_engine
        .evaluate_and_send(&host, &sample)
        .await
        .unwrap();
    assert!(stack
        .database
        .alert_history(host.id, 100)
        .await
        .unwrap()
        .is_empty());

    // Lower the threshold; the same value must now trigger without any
    // restart or cache flush
    stack
        .database
        .update_thresholds(
            host.id,
            &ThresholdUpdate {
                cpu_threshold: Some(70.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let sample = stack
        .database
        .insert_sample(host.id, &new_sample(75.0, 40.0))
        .await
        .unwrap();
    stack
        .alert_engine
        .evaluate_and_send(&host, &sample)
        .await
        .unwrap();

    let history = stack.database.alert_history(host.id, 100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].alert_type, "CPU");
    assert_eq!(history[0].threshold, 70.0);
}

#[tokio::test]
async fn test_io_thresholds_compared_in_mb_per_second() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    stack
        .database
        .update_thresholds(
            host.id,
            &ThresholdUpdate {
                disk_io_threshold: Some(100.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // 150 MB/s read rate, expressed in bytes/s as stored on the sample
    let mut io_sample = new_sample(10.0, 40.0);
    io_sample.disk_io_read = Some(150.0 * 1024.0 * 1024.0);
    let sample = stack
        .database
        .insert_sample(host.id, &io_sample)
        .await
        .unwrap();

    stack
        .alert_engine
        .evaluate_and_send(&host, &sample)
        .await
        .unwrap();

    let history = stack.database.alert_history(host.id, 100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].alert_type, "DiskIO");
    assert!((history[0].value - 150.0).abs() < 0.01);
    assert_eq!(history[0].threshold, 100.0);
}
