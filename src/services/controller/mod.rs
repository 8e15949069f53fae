//! Control loop
//!
//! The Controller is the single consumer of completed passages. For each one
//! it classifies the vehicle, triggers a plate capture on infractions and
//! publishes the resulting display snapshot. Camera results arrive later on
//! the capture channel and are merged into whatever snapshot is current.

mod handlers;

use crate::domain::types::CaptureEvent;
use crate::infra::config::{Config, LoopMode};
use crate::infra::metrics::Metrics;
use crate::io::camera::CaptureGateway;
use crate::services::classifier::Classifier;
use crate::services::display::DisplayPublisher;
use crate::services::edge_detector::RearmHandle;
use crate::services::passage_queue::PassageConsumer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

pub struct Controller {
    pub(crate) classifier: Classifier,
    pub(crate) camera: Arc<dyn CaptureGateway>,
    pub(crate) display: DisplayPublisher,
    /// Tells the edge detector which records have been consumed
    pub(crate) rearm: RearmHandle,
    pub(crate) metrics: Arc<Metrics>,
    loop_mode: LoopMode,
    poll_interval: Duration,
    /// Infractions seen since start; also the violation id of the latest one
    pub(crate) violation_count: u64,
}

impl Controller {
    pub fn new(
        config: &Config,
        camera: Arc<dyn CaptureGateway>,
        display: DisplayPublisher,
        rearm: RearmHandle,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            classifier: Classifier::from_config(config),
            camera,
            display,
            rearm,
            metrics,
            loop_mode: config.loop_mode(),
            poll_interval: Duration::from_millis(config.poll_interval_ms()),
            violation_count: 0,
        }
    }

    /// Run until shutdown or until the passage queue closes
    pub async fn run(
        &mut self,
        mut passages: PassageConsumer,
        mut captures: mpsc::Receiver<CaptureEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(mode = ?self.loop_mode, "controller_started");
        match self.loop_mode {
            LoopMode::Event => self.run_event(&mut passages, &mut captures, &mut shutdown).await,
            LoopMode::Poll => self.run_poll(&mut passages, &mut captures, &mut shutdown).await,
        }
        info!(violations = %self.violation_count, "controller_stopped");
    }

    async fn run_event(
        &mut self,
        passages: &mut PassageConsumer,
        captures: &mut mpsc::Receiver<CaptureEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let mut captures_open = true;

        while !*shutdown.borrow() {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,
                record = passages.pop() => match record {
                    Some(record) => {
                        self.process_passage(record);
                    }
                    None => break,
                },
                event = captures.recv(), if captures_open => match event {
                    Some(event) => self.handle_capture_event(event),
                    None => captures_open = false,
                },
            }
        }
    }

    async fn run_poll(
        &mut self,
        passages: &mut PassageConsumer,
        captures: &mut mpsc::Receiver<CaptureEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        while !*shutdown.borrow() {
            self.poll_once(passages, captures);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One cooperative iteration: at most one passage, then at most one capture event.
    ///
    /// Returns true if anything was processed.
    pub fn poll_once(
        &mut self,
        passages: &mut PassageConsumer,
        captures: &mut mpsc::Receiver<CaptureEvent>,
    ) -> bool {
        let mut worked = false;
        if let Some(record) = passages.try_pop() {
            self.process_passage(record);
            worked = true;
        }
        if let Ok(event) = captures.try_recv() {
            self.handle_capture_event(event);
            worked = true;
        }
        worked
    }

    pub fn violation_count(&self) -> u64 {
        self.violation_count
    }
}
