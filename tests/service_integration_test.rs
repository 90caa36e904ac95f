//! Service Integration Tests
//!
//! Model lifecycle through the async service: train, swap, persist, reload.

mod fixtures;

use std::sync::Arc;

use fixtures::normal_fleet;
use fuelwatch::detector::DetectorConfig;
use fuelwatch::preprocess::PreprocessConfig;
use fuelwatch::service::{AnomalyService, ModelSource};
use fuelwatch::{Error, ModelStatus};
use tempfile::TempDir;

#[tokio::test]
async fn test_train_then_predict() {
    let service = AnomalyService::default();
    let stats = service.train(normal_fleet(90, 3, 1)).await.unwrap();
    assert_eq!(stats.total_records, 90);

    let status = service.status().await;
    assert!(status.model.is_trained());
    assert_eq!(status.last_training, Some(stats.training_date));

    let table = service.predict(normal_fleet(30, 3, 2)).await.unwrap();
    assert_eq!(table.len(), 30);

    let flags = service.anomaly_flags(normal_fleet(30, 3, 2)).await.unwrap();
    assert_eq!(flags.len(), 30);
    assert!(flags.iter().all(|f| f.record_id.is_some()));
}

#[tokio::test]
async fn test_concurrent_predictions_share_model() {
    let service = Arc::new(AnomalyService::default());
    service.train(normal_fleet(80, 4, 3)).await.unwrap();

    let batch = normal_fleet(40, 4, 4);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let batch = batch.clone();
            tokio::spawn(async move { service.predict(batch).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_failed_retrain_keeps_current_model() {
    let service = AnomalyService::default();
    service.train(normal_fleet(60, 3, 5)).await.unwrap();
    let before = service.detector().await.model_version().map(str::to_string);

    let result = service.train(normal_fleet(1, 1, 6)).await;
    assert!(matches!(result, Err(Error::Data(_))));

    let after = service.detector().await.model_version().map(str::to_string);
    assert_eq!(before, after);
    assert!(before.is_some());
}

#[tokio::test]
async fn test_load_or_train_reuses_saved_bundle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fuel_anomaly_model.json");

    let first = AnomalyService::default();
    let source = first
        .load_or_train(&path, normal_fleet(60, 3, 7), false)
        .await
        .unwrap();
    let (trained_version, trained_stats) = match source {
        ModelSource::Trained { model_version, stats } => {
            assert_eq!(stats.total_records, 60);
            (model_version, stats)
        }
        other => panic!("expected training, got {:?}", other),
    };
    assert!(path.exists());

    let second = AnomalyService::default();
    let source = second
        .load_or_train(&path, Vec::new(), false)
        .await
        .unwrap();
    assert_eq!(
        source,
        ModelSource::Loaded {
            model_version: trained_version.clone()
        }
    );
    assert_eq!(
        second.status().await.last_training,
        Some(trained_stats.training_date)
    );

    let source = second
        .load_or_train(&path, normal_fleet(60, 3, 8), true)
        .await
        .unwrap();
    assert!(matches!(source, ModelSource::Trained { .. }));
}

#[tokio::test]
async fn test_load_replaces_last_training_date() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("older.json");

    let older = AnomalyService::default();
    let older_stats = older.train(normal_fleet(60, 3, 3)).await.unwrap();
    older.save(&path).await.unwrap();

    let service = AnomalyService::default();
    let newer_stats = service.train(normal_fleet(60, 3, 4)).await.unwrap();
    assert_eq!(
        service.status().await.last_training,
        Some(newer_stats.training_date)
    );

    service.load(&path).await.unwrap();
    let status = service.status().await;
    assert_eq!(status.last_training, Some(older_stats.training_date));
    match status.model {
        ModelStatus::Trained(info) => {
            assert_eq!(info.training_stats.training_date, older_stats.training_date);
        }
        other => panic!("expected trained model, got {:?}", other),
    }
}

#[tokio::test]
async fn test_train_and_save_uses_versioned_name() {
    let dir = TempDir::new().unwrap();
    let service = AnomalyService::new(
        DetectorConfig {
            n_estimators: 25,
            ..DetectorConfig::default()
        },
        PreprocessConfig::default(),
    );
    let (_, path) = service
        .train_and_save(dir.path(), normal_fleet(50, 2, 9))
        .await
        .unwrap();

    let version = service
        .detector()
        .await
        .model_version()
        .unwrap_or_default()
        .to_string();
    assert_eq!(
        path,
        dir.path().join(format!("anomaly_model_{}.json", version))
    );
    assert!(path.exists());

    match service.status().await.model {
        ModelStatus::Trained(info) => assert_eq!(info.model_params.n_estimators, 25),
        ModelStatus::NotTrained => panic!("expected trained model"),
    }
}

#[tokio::test]
async fn test_load_missing_bundle_fails() {
    let dir = TempDir::new().unwrap();
    let service = AnomalyService::default();
    let result = service.load(dir.path().join("absent.json")).await;
    assert!(matches!(result, Err(Error::Io(_))));
    assert!(!service.status().await.model.is_trained());
}
