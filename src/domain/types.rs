//! Shared types for the radar controller

use serde::Serialize;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Maximum number of plate characters a display can show
pub const PLATE_MAX_CHARS: usize = 8;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Monotonic millisecond clock anchored at controller start
///
/// Edge timestamps only need to be comparable with each other, so they are
/// taken from this clock rather than wall time.
#[derive(Debug, Clone, Copy)]
pub struct Uptime {
    origin: Instant,
}

impl Uptime {
    pub fn start() -> Self {
        Self { origin: Instant::now() }
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for Uptime {
    fn default() -> Self {
        Self::start()
    }
}

/// Which of the two axle sensors fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SensorId {
    /// Entry sensor, counts axles
    S1,
    /// Exit sensor, completes the passage
    S2,
}

impl SensorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorId::S1 => "s1",
            SensorId::S2 => "s2",
        }
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SensorId {
    type Err = UnknownSensor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S1" | "1" => Ok(SensorId::S1),
            "S2" | "2" => Ok(SensorId::S2),
            other => Err(UnknownSensor(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown sensor '{0}'")]
pub struct UnknownSensor(pub String);

/// A single active edge on one of the sensor inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorEdge {
    pub sensor: SensorId,
    /// Uptime milliseconds when the edge was observed
    pub at_ms: u64,
}

impl SensorEdge {
    pub fn new(sensor: SensorId, at_ms: u64) -> Self {
        Self { sensor, at_ms }
    }
}

/// A completed vehicle passage handed from the edge context to the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassageRecord {
    /// Emission sequence number (starts at 1)
    pub seq: u64,
    /// Time between the first S1 edge and the S2 edge
    pub elapsed_ms: u64,
    /// Always >= 2
    pub axle_count: u32,
}

/// Weight class derived from the axle count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Light,
    Heavy,
}

impl VehicleClass {
    #[inline]
    pub fn from_axles(axle_count: u32) -> Self {
        if axle_count <= 2 {
            VehicleClass::Light
        } else {
            VehicleClass::Heavy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Light => "light",
            VehicleClass::Heavy => "heavy",
        }
    }

    /// Label shown on the display
    pub fn label(&self) -> &'static str {
        match self {
            VehicleClass::Light => "LIGHT (2 axles)",
            VehicleClass::Heavy => "HEAVY (>=3 axles)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationStatus {
    Normal,
    Warning,
    Infraction,
}

impl ViolationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationStatus::Normal => "normal",
            ViolationStatus::Warning => "warning",
            ViolationStatus::Infraction => "infraction",
        }
    }
}

/// Plate field of the display
///
/// Sentinels cover every state of the capture flow; a read plate is kept to
/// at most [`PLATE_MAX_CHARS`] characters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlateInfo {
    /// No capture for this passage
    #[default]
    Unavailable,
    /// Capture accepted, waiting for the camera
    Capturing,
    /// Camera busy or refused the request
    Rejected,
    /// Camera reported a failed capture
    Failed,
    Plate(String),
}

impl PlateInfo {
    /// Build a plate value, truncated to the display width
    pub fn plate(text: &str) -> Self {
        PlateInfo::Plate(text.trim().chars().take(PLATE_MAX_CHARS).collect())
    }

    pub fn as_str(&self) -> &str {
        match self {
            PlateInfo::Unavailable => "N/A",
            PlateInfo::Capturing => "PENDING",
            PlateInfo::Rejected => "ERROR",
            PlateInfo::Failed => "FAILED",
            PlateInfo::Plate(p) => p,
        }
    }
}

impl std::fmt::Display for PlateInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PlateInfo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Latest status shown to drivers and operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    pub status: ViolationStatus,
    pub speed_kmh: f64,
    pub limit_kmh: f64,
    pub vehicle_class: VehicleClass,
    pub vehicle_type: &'static str,
    pub plate: PlateInfo,
    /// Violation number, set only for infractions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_id: Option<u64>,
    /// Timestamp (epoch ms) of the publish
    pub ts_ms: u64,
}

/// Identifier of a capture request (UUIDv7, time-sortable)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureId(pub String);

impl CaptureId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for CaptureId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CaptureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immediate answer to a capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureAck {
    Accepted(CaptureId),
    Busy,
}

/// Out-of-band result of an accepted capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Data { request_id: CaptureId, plate: String },
    Error { request_id: CaptureId, reason: String },
}

impl CaptureEvent {
    pub fn request_id(&self) -> &CaptureId {
        match self {
            CaptureEvent::Data { request_id, .. } | CaptureEvent::Error { request_id, .. } => {
                request_id
            }
        }
    }
}
