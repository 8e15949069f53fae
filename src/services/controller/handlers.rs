//! Passage and capture handlers for the Controller

use super::Controller;
use crate::domain::types::{
    epoch_ms, CaptureAck, CaptureEvent, DisplaySnapshot, PassageRecord, PlateInfo, ViolationStatus,
};
use std::time::Instant;
use tracing::{debug, error, info, warn};

impl Controller {
    /// Classify one passage and publish its snapshot.
    ///
    /// Returns the published snapshot, or `None` if the record was rejected.
    /// The record is acknowledged to the edge detector either way.
    pub fn process_passage(&mut self, record: PassageRecord) -> Option<DisplaySnapshot> {
        let process_start = Instant::now();
        let snapshot = self.evaluate(&record);
        self.rearm.acknowledge(record.seq);

        if let Some(ref snapshot) = snapshot {
            let latency_us = process_start.elapsed().as_micros() as u64;
            self.metrics.record_classified(snapshot.status, latency_us);
        }
        snapshot
    }

    fn evaluate(&mut self, record: &PassageRecord) -> Option<DisplaySnapshot> {
        let classification = match self.classifier.classify(record) {
            Ok(c) => c,
            Err(e) => {
                self.metrics.record_passage_rejected();
                warn!(
                    seq = %record.seq,
                    elapsed_ms = %record.elapsed_ms,
                    axles = %record.axle_count,
                    error = %e,
                    "passage_rejected"
                );
                return None;
            }
        };

        let speed = format!("{:.1}", classification.speed_kmh);
        let (plate, violation_id) = match classification.status {
            ViolationStatus::Infraction => {
                self.violation_count += 1;
                error!(
                    violation_id = %self.violation_count,
                    speed_kmh = %speed,
                    limit_kmh = %classification.limit_kmh,
                    class = %classification.vehicle_class.as_str(),
                    axles = %record.axle_count,
                    "infraction_detected"
                );
                (self.request_capture(), Some(self.violation_count))
            }
            ViolationStatus::Warning => {
                warn!(
                    speed_kmh = %speed,
                    warning_kmh = %classification.warning_limit_kmh,
                    class = %classification.vehicle_class.as_str(),
                    "speed_warning"
                );
                (PlateInfo::Unavailable, None)
            }
            ViolationStatus::Normal => {
                info!(
                    speed_kmh = %speed,
                    class = %classification.vehicle_class.as_str(),
                    "speed_normal"
                );
                (PlateInfo::Unavailable, None)
            }
        };

        let snapshot = DisplaySnapshot {
            status: classification.status,
            speed_kmh: classification.speed_kmh,
            limit_kmh: classification.limit_kmh,
            vehicle_class: classification.vehicle_class,
            vehicle_type: classification.vehicle_class.label(),
            plate,
            violation_id,
            ts_ms: epoch_ms(),
        };
        self.display.publish(snapshot.clone());
        debug!(seq = %record.seq, status = %snapshot.status.as_str(), plate = %snapshot.plate, "display_updated");

        Some(snapshot)
    }

    fn request_capture(&self) -> PlateInfo {
        self.metrics.record_capture_requested();
        match self.camera.request_capture() {
            CaptureAck::Accepted(request_id) => {
                info!(request_id = %request_id, "capture_requested");
                PlateInfo::Capturing
            }
            CaptureAck::Busy => {
                self.metrics.record_capture_busy();
                warn!(violation_id = %self.violation_count, "capture_busy");
                PlateInfo::Rejected
            }
        }
    }

    /// Merge a camera result into the current snapshot
    pub fn handle_capture_event(&mut self, event: CaptureEvent) {
        let (plate, succeeded) = match &event {
            CaptureEvent::Data { request_id, plate } => {
                let plate = PlateInfo::plate(plate);
                info!(request_id = %request_id, plate = %plate, "capture_completed");
                (plate, true)
            }
            CaptureEvent::Error { request_id, reason } => {
                warn!(request_id = %request_id, reason = %reason, "capture_failed");
                (PlateInfo::Failed, false)
            }
        };
        self.metrics.record_capture_result(succeeded);

        if self.display.merge_plate(plate) {
            debug!(request_id = %event.request_id(), "display_plate_updated");
        } else {
            warn!(request_id = %event.request_id(), "capture_event_discarded_no_snapshot");
        }
    }
}
