//! Integration tests for the detection pipeline: joint spikes with
//! correlation lift, the minimum-window rule, and dedupe.

mod common;

use common::*;
use monitor::database::Severity;

/// Lower the correlation threshold for a host so the lift path can fire in
/// a two-metric scenario (disk and network stay flat and contribute zero).
async fn set_correlation_factor(stack: &TestStack, host_id: i64, factor: f64) {
    sqlx::query("UPDATE monitoring_configs SET correlation_threshold_factor = ? WHERE host_id = ?")
        .bind(factor)
        .bind(host_id)
        .execute(stack.database.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_joint_cpu_memory_spike_with_correlation_lift() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;
    set_correlation_factor(&stack, host.id, 0.6).await;

    // Steady baseline, then cpu and memory jump together
    let mut values: Vec<(f64, f64)> = (0..20)
        .map(|i| (20.0 + (i % 3) as f64, 50.0 + (i % 2) as f64 * 0.5))
        .collect();
    values.extend([(85.0, 88.0), (84.0, 88.5), (86.0, 88.2)]);

    let samples = backfill_cpu_series(&stack.database, &host, &values, 30).await;
    let latest = samples.last().unwrap();

    let config = stack
        .database
        .get_monitoring_config(host.id)
        .await
        .unwrap()
        .unwrap();

    let anomalies = stack
        .detector
        .detect(&host, &config, latest)
        .await
        .unwrap();

    let cpu = anomalies
        .iter()
        .find(|a| a.metric_type == "cpu")
        .expect("cpu anomaly expected");
    let memory = anomalies
        .iter()
        .find(|a| a.metric_type == "memory")
        .expect("memory anomaly expected");

    // Correlation lift: neither metric exceeds its threshold by much, but
    // the joint movement raises both to at least HIGH
    assert!(cpu.severity >= Severity::High, "cpu severity {:?}", cpu.severity);
    assert!(
        memory.severity >= Severity::High,
        "memory severity {:?}",
        memory.severity
    );

    for anomaly in [cpu, memory] {
        let context = anomaly
            .correlation
            .as_ref()
            .expect("correlation context attached");
        let scores = context
            .get("per_metric_scores")
            .expect("per-metric z-scores present");
        assert!(scores.get("cpu").is_some());
        assert!(scores.get("memory").is_some());
        assert!(scores.get("disk").is_some());
        assert!(scores.get("network").is_some());
    }
}

#[tokio::test]
async fn test_detection_requires_ten_samples() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let values: Vec<(f64, f64)> = (0..9).map(|_| (95.0, 95.0)).collect();
    let samples = backfill_cpu_series(&stack.database, &host, &values, 30).await;

    let config = stack
        .database
        .get_monitoring_config(host.id)
        .await
        .unwrap()
        .unwrap();

    let anomalies = stack
        .detector
        .detect(&host, &config, samples.last().unwrap())
        .await
        .unwrap();

    assert!(
        anomalies.is_empty(),
        "nine samples are below the detection minimum"
    );
}

#[tokio::test]
async fn test_duplicate_anomalies_suppressed_within_window() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let mut values: Vec<(f64, f64)> = (0..20).map(|i| (20.0 + (i % 3) as f64, 50.0)).collect();
    values.extend([(95.0, 50.0), (96.0, 50.0)]);
    let samples = backfill_cpu_series(&stack.database, &host, &values, 30).await;
    let latest = samples.last().unwrap();

    let config = stack
        .database
        .get_monitoring_config(host.id)
        .await
        .unwrap()
        .unwrap();

    let first = stack
        .detector
        .detect(&host, &config, latest)
        .await
        .unwrap();
    assert!(!first.is_empty(), "spike should produce an anomaly");

    // Immediately re-running against the same spike creates nothing new
    let second = stack
        .detector
        .detect(&host, &config, latest)
        .await
        .unwrap();
    assert!(
        second.is_empty(),
        "unresolved anomaly within 10 minutes must suppress duplicates"
    );

    let unresolved = stack.database.unresolved_for_host(host.id).await.unwrap();
    let cpu_count = unresolved
        .iter()
        .filter(|a| a.metric_type == "cpu" && a.metric_name == "cpu_percent")
        .count();
    assert_eq!(cpu_count, 1);
}

#[tokio::test]
async fn test_disk_breach_creates_per_mount_anomaly() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    // Baseline so the window requirement is met
    let values: Vec<(f64, f64)> = (0..15).map(|_| (20.0, 50.0)).collect();
    backfill_cpu_series(&stack.database, &host, &values, 30).await;

    let sample = stack
        .database
        .insert_sample(host.id, &sample_with_disk(20.0, 50.0, "/var", 97.0))
        .await
        .unwrap();

    let config = stack
        .database
        .get_monitoring_config(host.id)
        .await
        .unwrap()
        .unwrap();

    let anomalies = stack.detector.detect(&host, &config, &sample).await.unwrap();

    let disk = anomalies
        .iter()
        .find(|a| a.metric_type == "disk")
        .expect("disk anomaly expected");
    assert_eq!(disk.metric_name, "disk_percent_/var");
    assert_eq!(disk.metric_value, 97.0);
    // 97 versus the 90 threshold is a small excess
    assert_eq!(disk.severity, Severity::Low);
}

#[tokio::test]
async fn test_quiet_series_produces_no_anomalies() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let values: Vec<(f64, f64)> = (0..30)
        .map(|i| (20.0 + (i % 2) as f64, 50.0 + (i % 3) as f64))
        .collect();
    let samples = backfill_cpu_series(&stack.database, &host, &values, 30).await;

    let config = stack
        .database
        .get_monitoring_config(host.id)
        .await
        .unwrap()
        .unwrap();

    let anomalies = stack
        .detector
        .detect(&host, &config, samples.last().unwrap())
        .await
        .unwrap();

    assert!(anomalies.is_empty(), "stable series must stay quiet");
}
