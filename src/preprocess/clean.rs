//! Data hygiene ahead of feature engineering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stats;
use crate::record::FuelRecord;

/// A record that passed validation and outlier clipping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    /// Position of the originating record in the input batch
    pub source_index: usize,
    pub id: Option<i64>,
    pub vehicle_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub km_driven: f64,
    pub fuel_used: f64,
    pub fuel_efficiency: f64,
}

impl CleanRecord {
    fn from_record(source_index: usize, record: &FuelRecord) -> Self {
        Self {
            source_index,
            id: record.id,
            vehicle_id: record.vehicle_id.clone(),
            timestamp: record.timestamp,
            km_driven: record.km_driven,
            fuel_used: record.fuel_used,
            fuel_efficiency: record.efficiency(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClipColumn {
    FuelUsed,
    KmDriven,
    Efficiency,
}

impl ClipColumn {
    fn value(self, record: &CleanRecord) -> f64 {
        match self {
            ClipColumn::FuelUsed => record.fuel_used,
            ClipColumn::KmDriven => record.km_driven,
            ClipColumn::Efficiency => record.fuel_efficiency,
        }
    }
}

/// Chronological order with undated records last
pub(crate) fn by_timestamp(a: &Option<DateTime<Utc>>, b: &Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

const CLIP_ORDER: [ClipColumn; 3] = [
    ClipColumn::FuelUsed,
    ClipColumn::KmDriven,
    ClipColumn::Efficiency,
];

/// Drop invalid rows, clip `sigma`-outliers column by column and sort by time
/// (undated records last).
///
/// Clipping is sequential: each column's mean and deviation are computed on
/// the rows the previous column left behind. A column whose deviation is
/// undefined (fewer than two rows) retains nothing.
pub fn clean(records: &[FuelRecord], sigma: f64) -> Vec<CleanRecord> {
    let mut rows: Vec<CleanRecord> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.is_valid())
        .map(|(index, record)| CleanRecord::from_record(index, record))
        .collect();
    let valid = rows.len();

    for column in CLIP_ORDER {
        let values: Vec<f64> = rows.iter().map(|row| column.value(row)).collect();
        let bounds = stats::mean(&values).zip(stats::sample_std(&values));
        rows.retain(|row| match bounds {
            Some((mean, std)) => (column.value(row) - mean).abs() <= sigma * std,
            None => false,
        });
    }

    rows.sort_by(|a, b| by_timestamp(&a.timestamp, &b.timestamp));

    debug!(
        "Cleaned fuel records: input={}, valid={}, retained={}",
        records.len(),
        valid,
        rows.len()
    );
    rows
}
