//! Speed computation and violation classification

use crate::domain::types::{PassageRecord, VehicleClass, ViolationStatus};
use crate::infra::config::Config;
use thiserror::Error;

const MS_PER_S: f64 = 1000.0;
const MPS_TO_KMH: f64 = 3.6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("passage elapsed time is zero, speed undefined")]
    ZeroElapsed,
}

/// Speed in km/h for a vehicle covering `distance_m` in `elapsed_ms`
#[inline]
pub fn speed_kmh(distance_m: f64, elapsed_ms: u64) -> Result<f64, ClassifyError> {
    if elapsed_ms == 0 {
        return Err(ClassifyError::ZeroElapsed);
    }
    Ok(distance_m / (elapsed_ms as f64 / MS_PER_S) * MPS_TO_KMH)
}

/// Status for a measured speed. Both boundaries are strict.
#[inline]
pub fn status_for(speed_kmh: f64, limit_kmh: f64, warning_limit_kmh: f64) -> ViolationStatus {
    if speed_kmh > limit_kmh {
        ViolationStatus::Infraction
    } else if speed_kmh > warning_limit_kmh {
        ViolationStatus::Warning
    } else {
        ViolationStatus::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub vehicle_class: VehicleClass,
    pub speed_kmh: f64,
    pub limit_kmh: f64,
    pub warning_limit_kmh: f64,
    pub status: ViolationStatus,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    distance_m: f64,
    light_limit_kmh: f64,
    heavy_limit_kmh: f64,
    warning_percent: f64,
}

impl Classifier {
    pub fn new(distance_m: f64, light_limit_kmh: f64, heavy_limit_kmh: f64, warning_percent: f64) -> Self {
        Self { distance_m, light_limit_kmh, heavy_limit_kmh, warning_percent }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sensor_distance_m(),
            config.light_limit_kmh(),
            config.heavy_limit_kmh(),
            config.warning_percent(),
        )
    }

    pub fn limit_for(&self, class: VehicleClass) -> f64 {
        match class {
            VehicleClass::Light => self.light_limit_kmh,
            VehicleClass::Heavy => self.heavy_limit_kmh,
        }
    }

    pub fn classify(&self, record: &PassageRecord) -> Result<Classification, ClassifyError> {
        let speed_kmh = speed_kmh(self.distance_m, record.elapsed_ms)?;
        let vehicle_class = VehicleClass::from_axles(record.axle_count);
        let limit_kmh = self.limit_for(vehicle_class);
        let warning_limit_kmh = limit_kmh * self.warning_percent / 100.0;

        Ok(Classification {
            vehicle_class,
            speed_kmh,
            limit_kmh,
            warning_limit_kmh,
            status: status_for(speed_kmh, limit_kmh, warning_limit_kmh),
        })
    }
}
