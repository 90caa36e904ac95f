//! Test Data
//!
//! Deterministic synthetic fleets shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use fuelwatch::FuelRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shape of one vehicle's normal trips
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub km: (f64, f64),
    pub efficiency: (f64, f64),
}

pub const HIGHWAY: Profile = Profile {
    km: (200.0, 400.0),
    efficiency: (7.0, 9.0),
};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 6, 0, 0).unwrap()
}

/// `count` trips of `vehicle` starting `offset_hours` after the base time,
/// four hours apart
pub fn trips(
    rng: &mut StdRng,
    vehicle: &str,
    profile: Profile,
    count: usize,
    offset_hours: i64,
) -> Vec<FuelRecord> {
    (0..count)
        .map(|i| {
            let km = rng.gen_range(profile.km.0..profile.km.1);
            let efficiency = rng.gen_range(profile.efficiency.0..profile.efficiency.1);
            FuelRecord::new(
                vehicle,
                base_time() + Duration::hours(offset_hours + 4 * i as i64),
                km,
                km / efficiency,
            )
        })
        .collect()
}

/// Assign sequential storage ids starting at 1
pub fn with_ids(mut records: Vec<FuelRecord>) -> Vec<FuelRecord> {
    for (i, record) in records.iter_mut().enumerate() {
        record.id = Some(i as i64 + 1);
    }
    records
}

/// `total` normal highway trips spread round-robin over `vehicles` vehicles
pub fn normal_fleet(total: usize, vehicles: usize, seed: u64) -> Vec<FuelRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let records = (0..total)
        .map(|i| {
            let vehicle = format!("TRK-{:03}", i % vehicles + 1);
            let mut trip = trips(&mut rng, &vehicle, HIGHWAY, 1, 0).remove(0);
            trip.timestamp = Some(base_time() + Duration::hours(3 * i as i64));
            trip
        })
        .collect();
    with_ids(records)
}

/// Three vehicles with clearly different duty cycles
pub fn mixed_fleet(per_vehicle: usize, seed: u64) -> Vec<FuelRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = trips(
        &mut rng,
        "CITY-1",
        Profile {
            km: (45.0, 55.0),
            efficiency: (5.5, 6.5),
        },
        per_vehicle,
        0,
    );
    records.extend(trips(
        &mut rng,
        "LONG-2",
        Profile {
            km: (570.0, 630.0),
            efficiency: (9.5, 10.5),
        },
        per_vehicle,
        1,
    ));
    records.extend(trips(
        &mut rng,
        "ECO-3",
        Profile {
            km: (285.0, 315.0),
            efficiency: (13.5, 14.5),
        },
        per_vehicle,
        2,
    ));
    with_ids(records)
}

pub fn mean_fuel(records: &[FuelRecord], vehicle: &str) -> f64 {
    let fuel: Vec<f64> = records
        .iter()
        .filter(|r| r.vehicle_id == vehicle)
        .map(|r| r.fuel_used)
        .collect();
    fuel.iter().sum::<f64>() / fuel.len() as f64
}
