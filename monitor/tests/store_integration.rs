//! Integration tests for the store: ownership, ordering, and idempotence.

mod common;

use chrono::Utc;
use common::*;
use monitor::database::hosts::ThresholdUpdate;
use monitor::database::{AlertStatus, NewAnomaly, ServiceState, Severity};

#[tokio::test]
async fn test_create_host_creates_default_config() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let config = stack
        .database
        .get_monitoring_config(host.id)
        .await
        .unwrap()
        .expect("config created with host");

    assert!(config.enabled);
    assert!(!config.suspended);
    assert_eq!(config.cpu_threshold, 80.0);
    assert_eq!(config.monitored_disks, vec!["/".to_string()]);
}

#[tokio::test]
async fn test_sample_timestamps_non_decreasing() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    for i in 0..5 {
        stack
            .database
            .insert_sample(host.id, &new_sample(10.0 + i as f64, 40.0))
            .await
            .unwrap();
    }

    let samples = stack.database.recent_samples(host.id, 10).await.unwrap();
    assert_eq!(samples.len(), 5);
    for pair in samples.windows(2) {
        assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "timestamps must be non-decreasing"
        );
    }
}

#[tokio::test]
async fn test_recent_samples_returns_newest_ascending() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let values: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 40.0)).collect();
    backfill_cpu_series(&stack.database, &host, &values, 30).await;

    let samples = stack.database.recent_samples(host.id, 3).await.unwrap();
    assert_eq!(samples.len(), 3);
    // The newest three, oldest first
    assert_eq!(samples[0].cpu_percent, 7.0);
    assert_eq!(samples[2].cpu_percent, 9.0);
}

#[tokio::test]
async fn test_latest_sample() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    assert!(stack.database.latest_sample(host.id).await.unwrap().is_none());

    backfill_cpu_series(&stack.database, &host, &[(10.0, 40.0), (20.0, 41.0)], 30).await;

    let latest = stack.database.latest_sample(host.id).await.unwrap().unwrap();
    assert_eq!(latest.cpu_percent, 20.0);
}

#[tokio::test]
async fn test_resolve_anomaly_is_idempotent() {
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
            severity: Severity::High,
            anomaly_score: 0.8,
            correlation: None,
        })
        .await
        .unwrap();

    let first = stack
        .database
        .resolve_anomaly(anomaly.id, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert!(first.resolved);
    let first_resolved_at = first.resolved_at.expect("resolved_at set with resolved");

    // Second resolution keeps the original timestamp
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let second = stack
        .database
        .resolve_anomaly(anomaly.id, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert!(second.resolved);
    assert_eq!(second.resolved_at.unwrap(), first_resolved_at);
}

#[tokio::test]
async fn test_bulk_resolve_counts_only_open_anomalies() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let mut ids = Vec::new();
    for i in 0..3 {
        let anomaly = stack
            .database
            .insert_anomaly(&NewAnomaly {
                host_id: host.id,
                sample_id: None,
                metric_type: "cpu".to_string(),
                metric_name: format!("cpu_percent_{}", i),
                metric_value: 95.0,
                severity: Severity::Medium,
                anomaly_score: 0.5,
                correlation: None,
            })
            .await
            .unwrap();
        ids.push(anomaly.id);
    }

    stack
        .database
        .resolve_anomaly(ids[0], Utc::now())
        .await
        .unwrap();

    let resolved = stack.database.bulk_resolve_anomalies(&ids).await.unwrap();
    assert_eq!(resolved, 2, "already-resolved anomaly must not count");
    assert_eq!(stack.database.unresolved_count(host.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_heartbeat_upsert_is_idempotent() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let ts = Utc::now();
    let first = stack
        .database
        .upsert_heartbeat(host.id, ts, Some("1.2.0"))
        .await
        .unwrap();
    let second = stack
        .database
        .upsert_heartbeat(host.id, ts, None)
        .await
        .unwrap();

    assert_eq!(first.last_heartbeat, second.last_heartbeat);
    // Missing agent version on the second beat keeps the known one
    assert_eq!(second.agent_version.as_deref(), Some("1.2.0"));
}

#[tokio::test]
async fn test_services_are_host_specific() {
    let stack = build_stack().await;
    let web = create_host(&stack.database, fixtures::hosts::WEB_1).await;
    let db = create_host(&stack.database, fixtures::hosts::DB_1).await;

    stack
        .database
        .upsert_service(web.id, "nginx", ServiceState::Running, "systemd")
        .await
        .unwrap();
    stack
        .database
        .upsert_service(db.id, "nginx", ServiceState::Running, "systemd")
        .await
        .unwrap();

    // Enabling monitoring on one host must not affect the other
    assert!(stack
        .database
        .set_service_monitoring(web.id, "nginx", true)
        .await
        .unwrap());

    let web_monitored = stack.database.monitored_services(web.id).await.unwrap();
    let db_monitored = stack.database.monitored_services(db.id).await.unwrap();
    assert_eq!(web_monitored.len(), 1);
    assert!(db_monitored.is_empty());
}

#[tokio::test]
async fn test_delete_host_cascades() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    stack
        .database
        .insert_sample(host.id, &new_sample(10.0, 40.0))
        .await
        .unwrap();
    stack
        .database
        .insert_anomaly(&NewAnomaly {
            host_id: host.id,
            sample_id: None,
            metric_type: "cpu".to_string(),
            metric_name: "cpu_percent".to_string(),
            metric_value: 95.0,
            severity: Severity::Low,
            anomaly_score: 0.2,
            correlation: None,
        })
        .await
        .unwrap();
    stack
        .database
        .upsert_heartbeat(host.id, Utc::now(), None)
        .await
        .unwrap();
    stack
        .database
        .upsert_service(host.id, "nginx", ServiceState::Running, "systemd")
        .await
        .unwrap();

    stack.database.delete_host(host.id).await.unwrap();

    assert!(stack.database.get_host(host.id).await.unwrap().is_none());
    assert!(stack.database.latest_sample(host.id).await.unwrap().is_none());
    assert_eq!(stack.database.unresolved_count(host.id).await.unwrap(), 0);
    assert!(stack.database.heartbeat_for(host.id).await.unwrap().is_none());
    assert!(stack.database.list_services(host.id).await.unwrap().is_empty());
    assert!(stack
        .database
        .get_monitoring_config(host.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_threshold_validation() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let over_range = ThresholdUpdate {
        cpu_threshold: Some(150.0),
        ..Default::default()
    };
    assert!(stack
        .database
        .update_thresholds(host.id, &over_range)
        .await
        .is_err());

    let short_interval = ThresholdUpdate {
        collection_interval_seconds: Some(2),
        ..Default::default()
    };
    assert!(stack
        .database
        .update_thresholds(host.id, &short_interval)
        .await
        .is_err());

    let valid = ThresholdUpdate {
        cpu_threshold: Some(70.0),
        collection_interval_seconds: Some(15),
        ..Default::default()
    };
    let config = stack
        .database
        .update_thresholds(host.id, &valid)
        .await
        .unwrap();
    assert_eq!(config.cpu_threshold, 70.0);
    assert_eq!(config.collection_interval_seconds, 15);
}

#[tokio::test]
async fn test_monitored_disks_always_keep_root() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    stack
        .database
        .update_monitored_disks(host.id, vec!["/var".to_string(), "/home".to_string()])
        .await
        .unwrap();

    let config = stack
        .database
        .get_monitoring_config(host.id)
        .await
        .unwrap()
        .unwrap();
    assert!(config.monitored_disks.iter().any(|d| d == "/"));
    assert!(config.monitored_disks.iter().any(|d| d == "/var"));
}

#[tokio::test]
async fn test_resolve_alert_record_clears_triggered_state() {
    let stack = build_stack().await;
    let host = create_host(&stack.database, fixtures::hosts::WEB_1).await;

    let record = stack
        .database
        .insert_alert_record(&monitor::database::NewAlertRecord {
            host_id: host.id,
            alert_type: "Memory".to_string(),
            status: AlertStatus::Triggered,
            value: 95.0,
            threshold: 90.0,
            message: "Memory usage is 95.0%".to_string(),
            recipients: String::new(),
            resolved_at: None,
        })
        .await
        .unwrap();

    assert!(stack.database.triggered_alert_exists(host.id).await.unwrap());

    stack
        .database
        .resolve_alert_record(record.id, Utc::now())
        .await
        .unwrap();

    assert!(!stack.database.triggered_alert_exists(host.id).await.unwrap());

    let history = stack.database.alert_history(host.id, 10).await.unwrap();
    assert_eq!(history[0].status, AlertStatus::Resolved);
    assert!(history[0].resolved_at.is_some());
}
