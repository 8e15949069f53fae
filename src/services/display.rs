//! Latest-value display channel
//!
//! One writer (the control loop), any number of readers. Readers always get
//! the most recent snapshot; intermediate values may be skipped.

use crate::domain::types::{DisplaySnapshot, PlateInfo};
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::watch;

pub struct DisplayPublisher {
    tx: watch::Sender<Option<DisplaySnapshot>>,
    metrics: Arc<Metrics>,
}

#[derive(Clone)]
pub struct DisplayReader {
    rx: watch::Receiver<Option<DisplaySnapshot>>,
}

pub fn display_channel(metrics: Arc<Metrics>) -> (DisplayPublisher, DisplayReader) {
    let (tx, rx) = watch::channel(None);
    (DisplayPublisher { tx, metrics }, DisplayReader { rx })
}

impl DisplayPublisher {
    /// Overwrite the held snapshot and wake readers
    pub fn publish(&self, snapshot: DisplaySnapshot) {
        self.tx.send_replace(Some(snapshot));
        self.metrics.record_display_publish();
    }

    /// Replace the plate of the held snapshot in one read-modify-write.
    ///
    /// Returns false when nothing has been published yet.
    pub fn merge_plate(&self, plate: PlateInfo) -> bool {
        let merged = self.tx.send_if_modified(|current| match current {
            Some(snapshot) => {
                snapshot.plate = plate;
                true
            }
            None => false,
        });
        if merged {
            self.metrics.record_display_publish();
        }
        merged
    }

    pub fn subscribe(&self) -> DisplayReader {
        DisplayReader { rx: self.tx.subscribe() }
    }
}

impl DisplayReader {
    /// Wait for a snapshot newer than the last one seen.
    ///
    /// Returns `None` once the publisher is dropped.
    pub async fn next(&mut self) -> Option<DisplaySnapshot> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(snapshot) = self.rx.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }

    pub fn latest(&self) -> Option<DisplaySnapshot> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{VehicleClass, ViolationStatus};

    fn snapshot(speed_kmh: f64) -> DisplaySnapshot {
        DisplaySnapshot {
            status: ViolationStatus::Normal,
            speed_kmh,
            limit_kmh: 80.0,
            vehicle_class: VehicleClass::Light,
            vehicle_type: VehicleClass::Light.label(),
            plate: PlateInfo::Unavailable,
            violation_id: None,
            ts_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_reader_sees_latest_only() {
        let (publisher, mut reader) = display_channel(Arc::new(Metrics::new()));

        publisher.publish(snapshot(10.0));
        publisher.publish(snapshot(20.0));

        assert_eq!(reader.next().await.unwrap().speed_kmh, 20.0);
    }

    #[tokio::test]
    async fn test_next_waits_for_new_value() {
        let (publisher, mut reader) = display_channel(Arc::new(Metrics::new()));
        publisher.publish(snapshot(10.0));
        reader.next().await.unwrap();

        let handle = tokio::spawn(async move { reader.next().await });
        tokio::task::yield_now().await;
        publisher.publish(snapshot(30.0));

        assert_eq!(handle.await.unwrap().unwrap().speed_kmh, 30.0);
    }

    #[test]
    fn test_merge_plate_keeps_other_fields() {
        let metrics = Arc::new(Metrics::new());
        let (publisher, reader) = display_channel(metrics.clone());
        publisher.publish(snapshot(90.0));

        assert!(publisher.merge_plate(PlateInfo::plate("AAA0A00")));

        let latest = reader.latest().unwrap();
        assert_eq!(latest.plate.as_str(), "AAA0A00");
        assert_eq!(latest.speed_kmh, 90.0);
        assert_eq!(metrics.display_publishes(), 2);
    }

    #[test]
    fn test_merge_plate_before_any_publish() {
        let metrics = Arc::new(Metrics::new());
        let (publisher, reader) = display_channel(metrics.clone());

        assert!(!publisher.merge_plate(PlateInfo::Failed));
        assert!(reader.latest().is_none());
        assert_eq!(metrics.display_publishes(), 0);
    }

    #[tokio::test]
    async fn test_next_ends_when_publisher_dropped() {
        let (publisher, mut reader) = display_channel(Arc::new(Metrics::new()));
        drop(publisher);
        assert!(reader.next().await.is_none());
    }
}
