//! Fuel log records consumed by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single raw fuel log entry as delivered by the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelRecord {
    /// Storage id used to write results back
    #[serde(default)]
    pub id: Option<i64>,
    pub vehicle_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Distance driven in kilometers
    pub km_driven: f64,
    /// Fuel consumed in liters
    pub fuel_used: f64,
    /// Stored efficiency (km/L); recomputed when absent or unusable
    #[serde(default)]
    pub fuel_efficiency: Option<f64>,
}

impl FuelRecord {
    pub fn new(
        vehicle_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        km_driven: f64,
        fuel_used: f64,
    ) -> Self {
        Self {
            id: None,
            vehicle_id: vehicle_id.into(),
            timestamp: Some(timestamp),
            km_driven,
            fuel_used,
            fuel_efficiency: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Both quantities strictly positive and finite
    pub fn is_valid(&self) -> bool {
        self.fuel_used.is_finite()
            && self.km_driven.is_finite()
            && self.fuel_used > 0.0
            && self.km_driven > 0.0
    }

    /// km/L, preferring the stored value when it is usable
    pub fn efficiency(&self) -> f64 {
        match self.fuel_efficiency {
            Some(value) if value.is_finite() && value > 0.0 => value,
            _ => self.km_driven / self.fuel_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(km: f64, fuel: f64) -> FuelRecord {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        FuelRecord::new("TRK-001", ts, km, fuel)
    }

    #[test]
    fn test_efficiency_computed_when_absent() {
        assert_eq!(record(300.0, 37.5).efficiency(), 8.0);
    }

    #[test]
    fn test_stored_efficiency_preferred() {
        let mut r = record(300.0, 37.5);
        r.fuel_efficiency = Some(7.9);
        assert_eq!(r.efficiency(), 7.9);

        r.fuel_efficiency = Some(0.0);
        assert_eq!(r.efficiency(), 8.0);
    }

    #[test]
    fn test_validity() {
        assert!(record(10.0, 1.0).is_valid());
        assert!(!record(0.0, 1.0).is_valid());
        assert!(!record(10.0, -1.0).is_valid());
        assert!(!record(f64::NAN, 1.0).is_valid());
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let json = r#"{"vehicle_id":"VAN-7","km_driven":120.0,"fuel_used":15.0}"#;
        let r: FuelRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.id, None);
        assert!(r.timestamp.is_none());
        assert_eq!(r.efficiency(), 8.0);
    }
}
