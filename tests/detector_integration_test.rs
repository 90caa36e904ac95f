//! Detector Integration Tests
//!
//! End-to-end training, scoring, analysis and persistence on synthetic fleets.

mod fixtures;

use chrono::Duration;
use fixtures::{base_time, mean_fuel, mixed_fleet, normal_fleet, trips, with_ids, Profile};
use fuelwatch::detector::{DetectorConfig, FittedBundle, FuelAnomalyDetector};
use fuelwatch::preprocess::{MissingFeaturePolicy, PreprocessConfig};
use fuelwatch::{Error, Feature, FuelRecord};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

fn trained_on(records: &[FuelRecord]) -> FuelAnomalyDetector {
    let mut detector = FuelAnomalyDetector::default();
    detector.train(records).unwrap();
    detector
}

#[test]
fn test_training_anomaly_rate_tracks_contamination() {
    let records = normal_fleet(100, 3, 11);
    let mut detector = FuelAnomalyDetector::default();
    let outcome = detector.train_with(&records, 0.05, 42).unwrap();

    assert_eq!(outcome.stats.total_records, 100);
    assert!(
        (0.03..=0.08).contains(&outcome.stats.anomaly_rate),
        "anomaly rate {}",
        outcome.stats.anomaly_rate
    );
    assert_eq!(outcome.stats.contamination_setting, 0.05);
    assert_eq!(outcome.stats.feature_names, Feature::CANDIDATES.to_vec());
}

#[test]
fn test_obvious_anomaly_is_top_ranked() {
    let mut records = mixed_fleet(30, 5);
    let injected_fuel = 3.0 * mean_fuel(&records, "CITY-1");
    let mut injected = FuelRecord::new(
        "CITY-1",
        base_time() + Duration::hours(4 * 30),
        50.0,
        injected_fuel,
    );
    injected.id = Some(999);
    records.push(injected);

    let mut detector = FuelAnomalyDetector::default();
    let outcome = detector.train(&records).unwrap();
    assert_eq!(outcome.stats.total_records, records.len());

    let top = detector.get_top_anomalies(&outcome.table, 1).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].row.id, Some(999));
    assert!(top[0].is_anomaly);

    // same verdict when scoring the raw batch
    let top = detector.get_top_anomalies(&records, 1).unwrap();
    assert_eq!(top[0].row.id, Some(999));
}

#[test]
fn test_vehicle_with_injected_anomalies_ranks_first() {
    let mut rng = StdRng::seed_from_u64(21);
    let profile = Profile {
        km: (285.0, 315.0),
        efficiency: (7.6, 8.4),
    };
    let mut training = trips(&mut rng, "VAN-A", profile, 40, 0);
    training.extend(trips(&mut rng, "VAN-B", profile, 40, 1));
    let detector = trained_on(&training);

    let mut batch = trips(&mut rng, "VAN-A", profile, 20, 500);
    let mut suspicious = trips(&mut rng, "VAN-B", profile, 20, 501);
    for trip in suspicious.iter_mut().step_by(2) {
        trip.fuel_used *= 2.5;
    }
    batch.extend(suspicious);
    let batch = with_ids(batch);

    let summary = detector.analyze_anomalies_by_vehicle(&batch).unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].vehicle_id, "VAN-B");
    assert!(summary[0].anomaly_rate > summary[1].anomaly_rate);
    assert!(summary[0].anomalies_detected >= 10);
    assert_eq!(summary[0].total_records, 20);
}

#[test]
fn test_training_is_deterministic_for_seed() {
    let records = normal_fleet(80, 4, 3);
    let first = trained_on(&records).predict(&records).unwrap();
    let second = trained_on(&records).predict(&records).unwrap();
    assert_eq!(first, second);

    let mut other = FuelAnomalyDetector::new(
        DetectorConfig {
            seed: 7,
            ..DetectorConfig::default()
        },
        PreprocessConfig::default(),
    );
    other.train(&records).unwrap();
    let third = other.predict(&records).unwrap();
    let scores = |t: &fuelwatch::LabeledTable| {
        t.iter().map(|r| r.anomaly_score).collect::<Vec<_>>()
    };
    assert_ne!(scores(&first), scores(&third));
}

#[test]
fn test_get_anomalies_label_and_threshold_consistency() {
    let records = normal_fleet(90, 3, 8);
    let detector = trained_on(&records);
    let table = detector.predict(&records).unwrap();

    let flagged = detector.get_anomalies(&table, None).unwrap();
    let expected: Vec<usize> = {
        let mut rows: Vec<_> = table.iter().filter(|r| r.is_anomaly).collect();
        rows.sort_by(|a, b| a.anomaly_score.total_cmp(&b.anomaly_score));
        rows.iter().map(|r| r.row.source_index).collect()
    };
    let got: Vec<usize> = flagged.iter().map(|r| r.row.source_index).collect();
    assert_eq!(got, expected);

    let threshold = 0.02;
    let below = detector.get_anomalies(&table, Some(threshold)).unwrap();
    assert_eq!(
        below.len(),
        table.iter().filter(|r| r.anomaly_score < threshold).count()
    );
    assert!(below.iter().all(|r| r.anomaly_score < threshold));
    assert!(below
        .windows(2)
        .all(|w| w[0].anomaly_score <= w[1].anomaly_score));

    // raw records are scored on the fly
    let from_raw = detector.get_anomalies(&records, None).unwrap();
    assert_eq!(from_raw, flagged);
}

#[test]
fn test_small_batches() {
    let records = normal_fleet(1, 1, 2);
    let mut detector = FuelAnomalyDetector::default();
    assert!(matches!(detector.train(&records), Err(Error::Data(_))));

    let detector = trained_on(&normal_fleet(60, 3, 2));
    let table = detector.predict(&records).unwrap();
    assert!(table.is_empty());
    assert!(detector.get_anomalies(&records, None).unwrap().is_empty());
}

#[test]
fn test_batch_without_timestamps_keeps_fitted_width() {
    let detector = trained_on(&normal_fleet(60, 3, 4));
    let mut batch = normal_fleet(15, 3, 5);
    for record in &mut batch {
        record.timestamp = None;
    }
    let table = detector.predict(&batch).unwrap();
    assert!(!table.is_empty());
    assert_eq!(detector.feature_names().len(), 16);

    let mut strict = FuelAnomalyDetector::new(
        DetectorConfig::default(),
        PreprocessConfig {
            missing_feature_policy: MissingFeaturePolicy::Reject,
            ..PreprocessConfig::default()
        },
    );
    strict.train(&normal_fleet(60, 3, 4)).unwrap();
    assert!(matches!(strict.predict(&batch), Err(Error::Shape(_))));
}

#[test]
fn test_undated_record_leaves_other_rows_untouched() {
    let detector = trained_on(&normal_fleet(90, 3, 1));
    let batch = normal_fleet(30, 3, 2);
    let baseline = detector.predict(&batch).unwrap();
    let score_of = |table: &fuelwatch::LabeledTable, index: usize| {
        table
            .iter()
            .find(|r| r.row.source_index == index)
            .map(|r| r.anomaly_score.to_bits())
    };

    // the last trip of TRK-003 keeps its place in the vehicle's history
    let mut damaged = batch.clone();
    damaged[29].timestamp = None;
    let table = detector.predict(&damaged).unwrap();
    assert_eq!(table.len(), baseline.len());
    let undated = table.iter().find(|r| r.row.source_index == 29).unwrap();
    assert!(undated.row.time.is_none());
    for index in 0..29 {
        assert_eq!(score_of(&table, index), score_of(&baseline, index), "row {}", index);
    }

    // an undated trip of TRK-001 only reorders that vehicle's history
    let mut damaged = batch.clone();
    damaged[0].timestamp = None;
    let table = detector.predict(&damaged).unwrap();
    for record in baseline.iter().filter(|r| r.row.vehicle_id != "TRK-001") {
        let index = record.row.source_index;
        assert_eq!(score_of(&table, index), score_of(&baseline, index), "row {}", index);
    }

    // a partly dated batch satisfies the strict policy
    let mut strict = FuelAnomalyDetector::new(
        DetectorConfig::default(),
        PreprocessConfig {
            missing_feature_policy: MissingFeaturePolicy::Reject,
            ..PreprocessConfig::default()
        },
    );
    strict.train(&normal_fleet(90, 3, 1)).unwrap();
    assert_eq!(strict.predict(&damaged).unwrap().len(), baseline.len());
}

#[test]
fn test_save_load_predict_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("models").join("fuel_anomaly_model.json");

    let records = normal_fleet(70, 3, 9);
    let detector = trained_on(&records);
    detector.save(&path).unwrap();

    let restored = FuelAnomalyDetector::load(&path).unwrap();
    assert_eq!(restored.model_version(), detector.model_version());
    assert_eq!(restored.status(), detector.status());

    let batch = normal_fleet(25, 3, 10);
    let before = detector.predict(&batch).unwrap();
    let after = restored.predict(&batch).unwrap();
    assert_eq!(before, after);
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.anomaly_score.to_bits(), b.anomaly_score.to_bits());
    }
}

#[test]
fn test_load_expecting_guards_feature_list() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle.json");
    trained_on(&normal_fleet(50, 2, 12)).save(&path).unwrap();

    let all = Feature::CANDIDATES.to_vec();
    assert!(FuelAnomalyDetector::load_expecting(&path, &all).is_ok());

    let without_time: Vec<Feature> = all.iter().copied().filter(|f| !f.is_temporal()).collect();
    let result = FuelAnomalyDetector::load_expecting(&path, &without_time);
    assert!(matches!(result, Err(Error::Shape(_))));

    let bundle = FittedBundle::load(&path).unwrap();
    assert_eq!(bundle.feature_names(), all.as_slice());
}

#[test]
fn test_anomaly_flags_keyed_by_storage_id() {
    let records = normal_fleet(45, 3, 13);
    let detector = trained_on(&records);
    let flags = detector.anomaly_flags(&records).unwrap();
    let table = detector.predict(&records).unwrap();

    assert_eq!(flags.len(), table.len());
    for flag in &flags {
        assert_eq!(flag.record_id, records[flag.source_index].id);
    }
    assert_eq!(
        flags.iter().filter(|f| f.is_anomaly).count(),
        table.anomaly_count()
    );
}

#[test]
fn test_evaluate_with_labels() {
    let mut records = mixed_fleet(30, 14);
    let mut truth = vec![false; records.len()];
    let injected_fuel = 3.0 * mean_fuel(&records, "CITY-1");
    records.push(FuelRecord::new(
        "CITY-1",
        base_time() + Duration::hours(4 * 30),
        50.0,
        injected_fuel,
    ));
    truth.push(true);

    let detector = trained_on(&records);
    let report = detector.evaluate_with_labels(&records, &truth).unwrap();
    assert_eq!(report.total(), records.len());
    assert_eq!(report.support_anomalous, 1);
    assert_eq!(report.recall, 1.0);
    assert!(report.accuracy > 0.9);
    assert!(report.classification_report.contains("accuracy"));
}
