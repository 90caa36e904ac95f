//! Views over a labeled table: anomaly subsets, rankings and per-vehicle
//! breakdowns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{LabeledTable, ScoredRecord};
use crate::preprocess::stats;

const SUMMARY_DECIMALS: i32 = 4;

/// Anomaly breakdown for one vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleAnomalySummary {
    pub vehicle_id: String,
    pub total_records: usize,
    pub anomalies_detected: usize,
    pub anomaly_rate: f64,
    pub avg_anomaly_score: f64,
    pub worst_anomaly_score: f64,
    pub avg_fuel_efficiency: f64,
    /// `None` for a vehicle with a single record
    pub fuel_efficiency_std: Option<f64>,
    pub avg_fuel_used: f64,
    pub avg_km_driven: f64,
}

/// Verdict for one input record, keyed for write-back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub record_id: Option<i64>,
    pub source_index: usize,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
}

fn by_score(records: &mut [ScoredRecord]) {
    records.sort_by(|a, b| a.anomaly_score.total_cmp(&b.anomaly_score));
}

/// Rows below `threshold`, or flagged rows when no threshold is given;
/// ascending by score.
pub fn select_anomalies(table: &LabeledTable, threshold: Option<f64>) -> Vec<ScoredRecord> {
    let mut selected: Vec<ScoredRecord> = table
        .iter()
        .filter(|record| match threshold {
            Some(t) => record.anomaly_score < t,
            None => record.is_anomaly,
        })
        .cloned()
        .collect();
    by_score(&mut selected);
    selected
}

/// The `n` lowest-scoring rows, ascending
pub fn top_anomalies(table: &LabeledTable, n: usize) -> Vec<ScoredRecord> {
    let mut ranked = table.records.clone();
    by_score(&mut ranked);
    ranked.truncate(n);
    ranked
}

/// Per-vehicle aggregates, highest anomaly rate first
pub fn summarize_by_vehicle(table: &LabeledTable) -> Vec<VehicleAnomalySummary> {
    let mut groups: BTreeMap<&str, Vec<&ScoredRecord>> = BTreeMap::new();
    for record in table.iter() {
        groups
            .entry(record.row.vehicle_id.as_str())
            .or_default()
            .push(record);
    }

    let round = |value: f64| stats::round_to(value, SUMMARY_DECIMALS);
    let mut summaries: Vec<VehicleAnomalySummary> = groups
        .into_iter()
        .map(|(vehicle_id, records)| {
            let column = |f: fn(&ScoredRecord) -> f64| -> Vec<f64> {
                records.iter().map(|r| f(*r)).collect()
            };
            let scores = column(|r| r.anomaly_score);
            let efficiency = column(|r| r.row.fuel_efficiency);
            let total_records = records.len();
            let anomalies_detected = records.iter().filter(|r| r.is_anomaly).count();

            VehicleAnomalySummary {
                vehicle_id: vehicle_id.to_string(),
                total_records,
                anomalies_detected,
                anomaly_rate: anomalies_detected as f64 / total_records as f64,
                avg_anomaly_score: round(stats::mean(&scores).unwrap_or(0.0)),
                worst_anomaly_score: round(stats::min(&scores).unwrap_or(0.0)),
                avg_fuel_efficiency: round(stats::mean(&efficiency).unwrap_or(0.0)),
                fuel_efficiency_std: stats::sample_std(&efficiency).map(round),
                avg_fuel_used: round(stats::mean(&column(|r| r.row.fuel_used)).unwrap_or(0.0)),
                avg_km_driven: round(stats::mean(&column(|r| r.row.km_driven)).unwrap_or(0.0)),
            }
        })
        .collect();

    summaries.sort_by(|a, b| b.anomaly_rate.total_cmp(&a.anomaly_rate));
    summaries
}

/// One flag per scored row, in table order
pub fn anomaly_flags(table: &LabeledTable) -> Vec<AnomalyFlag> {
    table
        .iter()
        .map(|record| AnomalyFlag {
            record_id: record.row.id,
            source_index: record.row.source_index,
            is_anomaly: record.is_anomaly,
            anomaly_score: record.anomaly_score,
        })
        .collect()
}
