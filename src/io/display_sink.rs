//! Display consumers
//!
//! Each sink holds its own [`DisplayReader`] and renders every snapshot it
//! sees. Slow sinks skip intermediate snapshots rather than queueing them.

use crate::domain::types::{DisplaySnapshot, ViolationStatus};
use crate::services::display::DisplayReader;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("mqtt publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// Somewhere a snapshot can be shown
#[async_trait]
pub trait DisplaySink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn show(&self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError>;
}

/// Operator console: one structured log line per snapshot
#[derive(Debug, Default)]
pub struct LogDisplay;

#[async_trait]
impl DisplaySink for LogDisplay {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn show(&self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError> {
        let speed = format!("{:.1}", snapshot.speed_kmh);
        match snapshot.status {
            ViolationStatus::Infraction => warn!(
                status = %snapshot.status.as_str(),
                speed_kmh = %speed,
                limit_kmh = %snapshot.limit_kmh,
                vehicle = %snapshot.vehicle_type,
                plate = %snapshot.plate,
                violation_id = ?snapshot.violation_id,
                "display"
            ),
            _ => info!(
                status = %snapshot.status.as_str(),
                speed_kmh = %speed,
                limit_kmh = %snapshot.limit_kmh,
                vehicle = %snapshot.vehicle_type,
                plate = %snapshot.plate,
                "display"
            ),
        }
        Ok(())
    }
}

/// Render snapshots on `sink` until shutdown or until the publisher goes away
pub async fn run_display(
    mut reader: DisplayReader,
    sink: Arc<dyn DisplaySink>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(sink = %sink.name(), "display_sink_started");

    loop {
        let snapshot = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            snapshot = reader.next() => match snapshot {
                Some(s) => s,
                None => break,
            },
        };

        if let Err(e) = sink.show(&snapshot).await {
            error!(sink = %sink.name(), error = %e, "display_sink_failed");
        }
    }

    debug!(sink = %sink.name(), "display_sink_stopped");
}
