//! Feature engineering and selection
//!
//! Turns cleaned fuel records into per-record feature rows (time of day,
//! per-vehicle deviations, rolling windows, ratios) and lays a chosen feature
//! list out as a dense row-major matrix.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::clean::{by_timestamp, CleanRecord};
use super::stats;
use super::MissingFeaturePolicy;
use crate::error::{Error, Result};

/// Decimals kept on the per-vehicle aggregates
const VEHICLE_STATS_DECIMALS: i32 = 4;

/// Candidate model inputs, in canonical column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    FuelEfficiency,
    FuelUsed,
    KmDriven,
    Hour,
    DayOfWeek,
    IsWeekend,
    EfficiencyDeviation,
    FuelUsedDeviation,
    KmDrivenDeviation,
    FuelEfficiencyRollingMean,
    FuelEfficiencyRollingStd,
    FuelUsedRollingMean,
    FuelUsedRollingStd,
    KmDrivenRollingMean,
    KmDrivenRollingStd,
    FuelPerKm,
}

impl Feature {
    pub const CANDIDATES: [Feature; 16] = [
        Feature::FuelEfficiency,
        Feature::FuelUsed,
        Feature::KmDriven,
        Feature::Hour,
        Feature::DayOfWeek,
        Feature::IsWeekend,
        Feature::EfficiencyDeviation,
        Feature::FuelUsedDeviation,
        Feature::KmDrivenDeviation,
        Feature::FuelEfficiencyRollingMean,
        Feature::FuelEfficiencyRollingStd,
        Feature::FuelUsedRollingMean,
        Feature::FuelUsedRollingStd,
        Feature::KmDrivenRollingMean,
        Feature::KmDrivenRollingStd,
        Feature::FuelPerKm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::FuelEfficiency => "fuel_efficiency",
            Feature::FuelUsed => "fuel_used",
            Feature::KmDriven => "km_driven",
            Feature::Hour => "hour",
            Feature::DayOfWeek => "day_of_week",
            Feature::IsWeekend => "is_weekend",
            Feature::EfficiencyDeviation => "efficiency_deviation",
            Feature::FuelUsedDeviation => "fuel_used_deviation",
            Feature::KmDrivenDeviation => "km_driven_deviation",
            Feature::FuelEfficiencyRollingMean => "fuel_efficiency_rolling_mean",
            Feature::FuelEfficiencyRollingStd => "fuel_efficiency_rolling_std",
            Feature::FuelUsedRollingMean => "fuel_used_rolling_mean",
            Feature::FuelUsedRollingStd => "fuel_used_rolling_std",
            Feature::KmDrivenRollingMean => "km_driven_rolling_mean",
            Feature::KmDrivenRollingStd => "km_driven_rolling_std",
            Feature::FuelPerKm => "fuel_per_km",
        }
    }

    /// Derived from the timestamp and therefore absent when no record of a
    /// batch has one
    pub fn is_temporal(self) -> bool {
        matches!(self, Feature::Hour | Feature::DayOfWeek | Feature::IsWeekend)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Feature::CANDIDATES
            .iter()
            .copied()
            .find(|feature| feature.name() == s)
            .ok_or_else(|| Error::Shape(format!("unknown feature: {}", s)))
    }
}

/// Time-of-day features
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeFeatures {
    pub hour: u32,
    /// Monday = 0
    pub day_of_week: u32,
    pub is_weekend: bool,
}

impl TimeFeatures {
    fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        let day_of_week = timestamp.weekday().num_days_from_monday();
        Self {
            hour: timestamp.hour(),
            day_of_week,
            is_weekend: day_of_week >= 5,
        }
    }
}

/// Aggregates of one vehicle joined onto each of its rows.
///
/// Standard deviations are 0 when the vehicle has a single record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleStats {
    pub fuel_efficiency_mean: f64,
    pub fuel_efficiency_std: f64,
    pub fuel_efficiency_min: f64,
    pub fuel_efficiency_max: f64,
    pub fuel_used_mean: f64,
    pub fuel_used_std: f64,
    pub km_driven_mean: f64,
    pub km_driven_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RollingStats {
    pub mean: f64,
    pub std: f64,
}

/// One engineered record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub source_index: usize,
    pub id: Option<i64>,
    pub vehicle_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub km_driven: f64,
    pub fuel_used: f64,
    pub fuel_efficiency: f64,
    pub time: Option<TimeFeatures>,
    pub vehicle: VehicleStats,
    pub efficiency_deviation: f64,
    pub fuel_used_deviation: f64,
    pub km_driven_deviation: f64,
    pub fuel_efficiency_rolling: RollingStats,
    pub fuel_used_rolling: RollingStats,
    pub km_driven_rolling: RollingStats,
    pub fuel_per_km: f64,
}

impl FeatureRow {
    /// Value of `feature`, `None` when the row cannot provide it
    pub fn value(&self, feature: Feature) -> Option<f64> {
        let value = match feature {
            Feature::FuelEfficiency => self.fuel_efficiency,
            Feature::FuelUsed => self.fuel_used,
            Feature::KmDriven => self.km_driven,
            Feature::Hour => self.time?.hour as f64,
            Feature::DayOfWeek => self.time?.day_of_week as f64,
            Feature::IsWeekend => {
                if self.time?.is_weekend {
                    1.0
                } else {
                    0.0
                }
            }
            Feature::EfficiencyDeviation => self.efficiency_deviation,
            Feature::FuelUsedDeviation => self.fuel_used_deviation,
            Feature::KmDrivenDeviation => self.km_driven_deviation,
            Feature::FuelEfficiencyRollingMean => self.fuel_efficiency_rolling.mean,
            Feature::FuelEfficiencyRollingStd => self.fuel_efficiency_rolling.std,
            Feature::FuelUsedRollingMean => self.fuel_used_rolling.mean,
            Feature::FuelUsedRollingStd => self.fuel_used_rolling.std,
            Feature::KmDrivenRollingMean => self.km_driven_rolling.mean,
            Feature::KmDrivenRollingStd => self.km_driven_rolling.std,
            Feature::FuelPerKm => self.fuel_per_km,
        };
        Some(value)
    }
}

/// Engineered rows ordered by (vehicle_id, timestamp).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub rows: Vec<FeatureRow>,
    /// At least one source record carried a timestamp
    pub has_time: bool,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, feature: Feature) -> bool {
        !feature.is_temporal() || self.has_time
    }

    /// Candidate features this table can provide, in canonical order
    pub fn available_features(&self) -> Vec<Feature> {
        Feature::CANDIDATES
            .iter()
            .copied()
            .filter(|feature| self.contains(*feature))
            .collect()
    }

    /// Input positions of the rows, in row order
    pub fn source_indices(&self) -> Vec<usize> {
        self.rows.iter().map(|row| row.source_index).collect()
    }
}

/// Trailing-window mean and sample deviation over `values`.
///
/// Windows hold at least one observation; a window of one has deviation 0.
pub fn rolling_stats(values: &[f64], window: usize) -> Vec<RollingStats> {
    let window = window.max(1);
    (0..values.len())
        .map(|end| {
            let start = (end + 1).saturating_sub(window);
            let slice = &values[start..=end];
            RollingStats {
                mean: stats::mean(slice).unwrap_or(0.0),
                std: stats::sample_std(slice).unwrap_or(0.0),
            }
        })
        .collect()
}

fn rounded(value: Option<f64>) -> Option<f64> {
    value.map(|v| stats::round_to(v, VEHICLE_STATS_DECIMALS))
}

/// (value - mean) / std, with a zero deviation treated as 1 and an undefined
/// one yielding 0.
fn deviation(value: f64, mean: f64, std: Option<f64>) -> f64 {
    match std {
        None => 0.0,
        Some(std) if std == 0.0 => value - mean,
        Some(std) => (value - mean) / std,
    }
}

struct VehicleGroup<'a> {
    records: Vec<&'a CleanRecord>,
}

impl VehicleGroup<'_> {
    fn column(&self, f: impl Fn(&CleanRecord) -> f64) -> Vec<f64> {
        self.records.iter().map(|record| f(*record)).collect()
    }

    fn engineer(&self, window: usize) -> Vec<FeatureRow> {
        let efficiency = self.column(|r| r.fuel_efficiency);
        let fuel = self.column(|r| r.fuel_used);
        let km = self.column(|r| r.km_driven);

        let efficiency_mean = rounded(stats::mean(&efficiency)).unwrap_or(0.0);
        let efficiency_std = rounded(stats::sample_std(&efficiency));
        let fuel_mean = rounded(stats::mean(&fuel)).unwrap_or(0.0);
        let fuel_std = rounded(stats::sample_std(&fuel));
        let km_mean = rounded(stats::mean(&km)).unwrap_or(0.0);
        let km_std = rounded(stats::sample_std(&km));

        let vehicle = VehicleStats {
            fuel_efficiency_mean: efficiency_mean,
            fuel_efficiency_std: efficiency_std.unwrap_or(0.0),
            fuel_efficiency_min: rounded(stats::min(&efficiency)).unwrap_or(0.0),
            fuel_efficiency_max: rounded(stats::max(&efficiency)).unwrap_or(0.0),
            fuel_used_mean: fuel_mean,
            fuel_used_std: fuel_std.unwrap_or(0.0),
            km_driven_mean: km_mean,
            km_driven_std: km_std.unwrap_or(0.0),
        };

        let efficiency_rolling = rolling_stats(&efficiency, window);
        let fuel_rolling = rolling_stats(&fuel, window);
        let km_rolling = rolling_stats(&km, window);

        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| FeatureRow {
                source_index: record.source_index,
                id: record.id,
                vehicle_id: record.vehicle_id.clone(),
                timestamp: record.timestamp,
                km_driven: record.km_driven,
                fuel_used: record.fuel_used,
                fuel_efficiency: record.fuel_efficiency,
                time: record.timestamp.map(TimeFeatures::from_timestamp),
                vehicle,
                efficiency_deviation: deviation(
                    record.fuel_efficiency,
                    efficiency_mean,
                    efficiency_std,
                ),
                fuel_used_deviation: deviation(record.fuel_used, fuel_mean, fuel_std),
                km_driven_deviation: deviation(record.km_driven, km_mean, km_std),
                fuel_efficiency_rolling: efficiency_rolling[i],
                fuel_used_rolling: fuel_rolling[i],
                km_driven_rolling: km_rolling[i],
                fuel_per_km: record.fuel_used / record.km_driven,
            })
            .collect()
    }
}

/// Derive the per-record feature table from cleaned records.
///
/// Each vehicle group is processed independently over its records ordered by
/// timestamp.
pub fn engineer_features(cleaned: &[CleanRecord], rolling_window: usize) -> FeatureTable {
    let has_time = cleaned.iter().any(|record| record.timestamp.is_some());

    let mut groups: BTreeMap<&str, VehicleGroup<'_>> = BTreeMap::new();
    for record in cleaned {
        groups
            .entry(record.vehicle_id.as_str())
            .or_insert_with(|| VehicleGroup {
                records: Vec::new(),
            })
            .records
            .push(record);
    }

    let mut rows = Vec::with_capacity(cleaned.len());
    for group in groups.values_mut() {
        group.records.sort_by(|a, b| by_timestamp(&a.timestamp, &b.timestamp));
        rows.extend(group.engineer(rolling_window));
    }

    debug!(
        "Engineered {} feature rows across {} vehicles",
        rows.len(),
        groups.len()
    );

    FeatureTable { rows, has_time }
}

/// Dense row-major matrix over a fixed list of feature columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<Feature>,
    data: Vec<f64>,
    n_rows: usize,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<Feature>, data: Vec<f64>) -> Result<Self> {
        let width = columns.len();
        if width == 0 {
            return Err(Error::Shape("feature matrix needs at least one column".into()));
        }
        if data.len() % width != 0 {
            return Err(Error::Shape(format!(
                "{} values do not fill rows of {} columns",
                data.len(),
                width
            )));
        }
        Ok(Self {
            n_rows: data.len() / width,
            columns,
            data,
        })
    }

    /// Lay `columns` out from `table`.
    ///
    /// A column the table cannot provide is zero-filled or rejected
    /// according to `policy`. An undated row inside a dated batch gets zeros
    /// for its time columns.
    pub fn from_table(
        table: &FeatureTable,
        columns: &[Feature],
        policy: MissingFeaturePolicy,
    ) -> Result<Self> {
        let missing: Vec<Feature> = columns
            .iter()
            .copied()
            .filter(|feature| !table.contains(*feature))
            .collect();

        if !missing.is_empty() {
            let names = missing.iter().map(|f| f.name()).collect::<Vec<_>>().join(", ");
            match policy {
                MissingFeaturePolicy::Reject => {
                    return Err(Error::Shape(format!(
                        "batch lacks fitted features: {}",
                        names
                    )));
                }
                MissingFeaturePolicy::ZeroFill => {
                    debug!("Zero-filling features absent from batch: {}", names);
                }
            }
        }

        let mut data = Vec::with_capacity(table.len() * columns.len());
        for row in &table.rows {
            data.extend(
                columns
                    .iter()
                    .map(|feature| row.value(*feature).unwrap_or(0.0)),
            );
        }
        Self::new(columns.to_vec(), data)
    }

    pub fn columns(&self) -> &[Feature] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let width = self.n_cols();
        &self.data[index * width..(index + 1) * width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.n_cols())
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows().map(|row| row[index]).collect()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols() + col]
    }

    pub(crate) fn map_rows(&self, f: impl Fn(&[f64], &mut Vec<f64>)) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.rows() {
            f(row, &mut data);
        }
        Self {
            columns: self.columns.clone(),
            data,
            n_rows: self.n_rows,
        }
    }
}
