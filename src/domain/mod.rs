//! Domain models - core types of the speed-enforcement pipeline
//!
//! - `SensorEdge` / `SensorId` - raw activations from the two axle sensors
//! - `PassageRecord` - a completed passage (elapsed time, axle count)
//! - `ViolationStatus` / `VehicleClass` - classification results
//! - `DisplaySnapshot` / `PlateInfo` - what the display shows
//! - `CaptureAck` / `CaptureEvent` - camera request/response contract

pub mod types;

pub use types::{
    epoch_ms, CaptureAck, CaptureEvent, CaptureId, DisplaySnapshot, PassageRecord, PlateInfo,
    SensorEdge, SensorId, Uptime, VehicleClass, ViolationStatus,
};
