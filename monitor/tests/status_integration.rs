//! Integration tests for the status calculator and the anomaly summary
//! service, including the adaptive grace period.

mod common;

use chrono::{Duration, Utc};
use common::*;
use monitor::cache::keys;
use monitor::database::{AlertStatus, NewAlertRecord, NewAnomaly, Severity};
use monitor::heartbeat::HostStatus;

async fn write_fresh_app_heartbeat(stack: &TestStack) {
    stack
        .cache
        .put(&keys::app_heartbeat(), &Utc::now().to_rfc3339(), 300)
        .await;
}

#[tokio::test]
async fn test_fresh_heartbeat_no_alerts_is_online() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    write_fresh_app_heartbeat(&stack).await;
    stack
        .database
        .upsert_heartbeat(host.id, Utc::now() - Duration::seconds(30), None)
        .await
        .unwrap();

    let status = stack.status_calculator.status(host.id).await.unwrap();
    assert_eq!(status, HostStatus::Online);

    let summary = stack.status_service.summary(host.id).await.unwrap();
    assert_eq!(summary.active, 0);
    assert_eq!(summary.highest_severity, "OK");
    assert_eq!(summary.details.cpu, "normal");
    assert_eq!(summary.details.memory, "normal");
    assert_eq!(summary.details.disk, "normal");
    assert_eq!(summary.details.network, "normal");
}

#[tokio::test]
async fn test_status_boundary_at_exact_threshold() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;
    write_fresh_app_heartbeat(&stack).await;

    // Base grace is 60 s; age of exactly 60 s is still online
    stack
        .database
        .upsert_heartbeat(host.id, Utc::now() - Duration::seconds(60), None)
        .await
        .unwrap();
    assert_eq!(
        stack.status_calculator.status(host.id).await.unwrap(),
        HostStatus::Online
    );

    // Well past the threshold: offline
    stack
        .database
        .upsert_heartbeat(host.id, Utc::now() - Duration::seconds(120), None)
        .await
        .unwrap();
    assert_eq!(
        stack.status_calculator.status(host.id).await.unwrap(),
        HostStatus::Offline
    );
}

#[tokio::test]
async fn test_missing_heartbeat_is_offline() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;
    write_fresh_app_heartbeat(&stack).await;

    assert_eq!(
        stack.status_calculator.status(host.id).await.unwrap(),
        HostStatus::Offline
    );
}

#[tokio::test]
async fn test_app_down_widens_grace_to_600s() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    // App heartbeat last seen 10 minutes ago (file only, cache empty)
    let stale = (Utc::now() - Duration::minutes(10)).to_rfc3339();
    tokio::fs::write(&stack.app_heartbeat_file, stale).await.unwrap();

    assert_eq!(stack.status_calculator.effective_threshold().await, 600);

    // Host heartbeat 300 s old would be offline under the base grace, but
    // survives the adaptive one
    stack
        .database
        .upsert_heartbeat(host.id, Utc::now() - Duration::seconds(300), None)
        .await
        .unwrap();
    assert_eq!(
        stack.status_calculator.status(host.id).await.unwrap(),
        HostStatus::Online
    );
}

#[tokio::test]
async fn test_missing_app_heartbeat_also_widens_grace() {
    let stack = build_stack().await;
    assert_eq!(stack.status_calculator.effective_threshold().await, 600);
}

#[tokio::test]
async fn test_unresolved_anomaly_yields_warning() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;
    write_fresh_app_heartbeat(&stack).await;

    stack
        .database
        .upsert_heartbeat(host.id, Utc::now(), None)
        .await
        .unwrap();
    stack
        .database
        .insert_anomaly(&NewAnomaly {
            host_id: host.id,
            sample_id: None,
            metric_type: "memory".to_string(),
            metric_name: "memory_percent".to_string(),
            metric_value: 95.0,
            severity: Severity::High,
            anomaly_score: 0.9,
            correlation: None,
        })
        .await
        .unwrap();

    assert_eq!(
        stack.status_calculator.status(host.id).await.unwrap(),
        HostStatus::Warning
    );
}

#[tokio::test]
async fn test_triggered_alert_yields_warning_until_resolved() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;
    write_fresh_app_heartbeat(&stack).await;

    stack
        .database
        .upsert_heartbeat(host.id, Utc::now(), None)
        .await
        .unwrap();

    stack
        .database
        .insert_alert_record(&NewAlertRecord {
            host_id: host.id,
            alert_type: "CPU".to_string(),
            status: AlertStatus::Triggered,
            value: 92.0,
            threshold: 80.0,
            message: "CPU usage is 92.0%".to_string(),
            recipients: String::new(),
            resolved_at: None,
        })
        .await
        .unwrap();
    assert_eq!(
        stack.status_calculator.status(host.id).await.unwrap(),
        HostStatus::Warning
    );

    // A later resolved event on the same channel clears the warning
    stack
        .database
        .insert_alert_record(&NewAlertRecord {
            host_id: host.id,
            alert_type: "CPU".to_string(),
            status: AlertStatus::Resolved,
            value: 50.0,
            threshold: 80.0,
            message: "CPU usage back to normal".to_string(),
            recipients: String::new(),
            resolved_at: Some(Utc::now()),
        })
        .await
        .unwrap();
    assert_eq!(
        stack.status_calculator.status(host.id).await.unwrap(),
        HostStatus::Online
    );
}

#[tokio::test]
async fn test_summary_cache_reconciles_with_store() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let anomaly = stack
        .database
        .insert_anomaly(&NewAnomaly {
            host_id: host.id,
            sample_id: None,
            metric_type: "cpu".to_string(),
            metric_name: "cpu_percent".to_string(),
            metric_value: 95.0,
            severity: Severity::Critical,
            anomaly_score: 0.95,
            correlation: None,
        })
        .await
        .unwrap();

    let summary = stack.status_service.summary(host.id).await.unwrap();
    assert_eq!(summary.active, 1);
    assert_eq!(summary.highest_severity, "CRITICAL");
    assert_eq!(summary.details.cpu, "anomaly");

    // Resolve behind the cache's back; the next read must not serve the
    // stale cached count
    stack
        .database
        .resolve_anomaly(anomaly.id, Utc::now())
        .await
        .unwrap();

    let summary = stack.status_service.summary(host.id).await.unwrap();
    assert_eq!(summary.active, 0);
    assert_eq!(summary.highest_severity, "OK");
    assert_eq!(summary.details.cpu, "normal");
}

#[tokio::test]
async fn test_summary_prefix_matching_for_metric_types() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    for (metric_type, metric_name) in [
        ("disk", "disk_percent_/var"),
        ("network", "network_throughput_eth0"),
    ] {
        stack
            .database
            .insert_anomaly(&NewAnomaly {
                host_id: host.id,
                sample_id: None,
                metric_type: metric_type.to_string(),
                metric_name: metric_name.to_string(),
                metric_value: 95.0,
                severity: Severity::Medium,
                anomaly_score: 0.5,
                correlation: None,
            })
            .await
            .unwrap();
    }

    let summary = stack.status_service.summary(host.id).await.unwrap();
    assert_eq!(summary.active, 2);
    assert_eq!(summary.highest_severity, "MEDIUM");
    assert_eq!(summary.details.disk, "anomaly");
    assert_eq!(summary.details.network, "anomaly");
    assert_eq!(summary.details.cpu, "normal");
}
