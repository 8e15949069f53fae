//! End-to-end pipeline: edges -> detector -> queue -> controller -> display

use radar_controller::domain::{PlateInfo, SensorEdge, SensorId, VehicleClass, ViolationStatus};
use radar_controller::infra::{Config, LoopMode, Metrics, RearmPolicy};
use radar_controller::io::camera::SimulatedCamera;
use radar_controller::io::{capture_channel, CaptureGateway, CAPTURE_CHANNEL_SIZE};
use radar_controller::services::{
    display_channel, passage_queue, Controller, DisplayReader, EdgeDetector, EdgeOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Pipeline {
    detector: EdgeDetector,
    reader: DisplayReader,
    metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
    controller: JoinHandle<Controller>,
}

fn start_pipeline(config: Config, camera_latency_ms: u64, fail_every: u64) -> Pipeline {
    let metrics = Arc::new(Metrics::new());
    let (producer, consumer) = passage_queue(config.queue_capacity(), metrics.clone());
    let (detector, rearm) = EdgeDetector::from_config(&config, producer, metrics.clone());

    let (capture_tx, capture_rx) = capture_channel(CAPTURE_CHANNEL_SIZE);
    let camera: Arc<dyn CaptureGateway> = Arc::new(SimulatedCamera::new(
        Duration::from_millis(camera_latency_ms),
        vec!["AAA0A00".to_string(), "BBB1B11".to_string()],
        fail_every,
        capture_tx,
    ));

    let (publisher, reader) = display_channel(metrics.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut controller = Controller::new(&config, camera, publisher, rearm, metrics.clone());
    let controller = tokio::spawn(async move {
        controller.run(consumer, capture_rx, shutdown_rx).await;
        controller
    });

    Pipeline { detector, reader, metrics, shutdown_tx, controller }
}

/// Feed one vehicle to the detector starting at `t0`
fn drive(detector: &EdgeDetector, t0: u64, axle_offsets: &[u64], elapsed_ms: u64) {
    for offset in axle_offsets {
        detector.on_edge(SensorEdge::new(SensorId::S1, t0 + offset));
    }
    detector.on_edge(SensorEdge::new(SensorId::S2, t0 + elapsed_ms));
}

async fn next(reader: &mut DisplayReader) -> radar_controller::domain::DisplaySnapshot {
    tokio::time::timeout(Duration::from_secs(2), reader.next())
        .await
        .expect("display update")
        .expect("publisher alive")
}

async fn stop(pipeline: Pipeline) -> Controller {
    pipeline.shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), pipeline.controller).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_normal_light_vehicle() {
    let mut p = start_pipeline(Config::default(), 0, 0);

    // 1 m in 72 ms = 50 km/h, second axle inside the debounce window
    drive(&p.detector, 1000, &[0, 50], 72);

    let snapshot = next(&mut p.reader).await;
    assert_eq!(snapshot.status, ViolationStatus::Normal);
    assert_eq!(snapshot.vehicle_class, VehicleClass::Light);
    assert!((snapshot.speed_kmh - 50.0).abs() < 1e-9);
    assert_eq!(snapshot.plate.as_str(), "N/A");

    stop(p).await;
}

#[tokio::test]
async fn test_infraction_gets_plate_from_camera() {
    let mut p = start_pipeline(Config::default(), 20, 0);

    // 1 m in 40 ms = 90 km/h
    drive(&p.detector, 0, &[0], 40);

    let pending = next(&mut p.reader).await;
    assert_eq!(pending.status, ViolationStatus::Infraction);
    assert_eq!(pending.plate, PlateInfo::Capturing);
    assert_eq!(pending.violation_id, Some(1));

    let captured = next(&mut p.reader).await;
    assert_eq!(captured.plate.as_str(), "AAA0A00");
    assert_eq!(captured.violation_id, Some(1));
    assert_eq!(captured.speed_kmh, pending.speed_kmh);

    let controller = stop(p).await;
    assert_eq!(controller.violation_count(), 1);
}

#[tokio::test]
async fn test_heavy_vehicle_classified() {
    let mut p = start_pipeline(Config::default(), 0, 0);

    // Three axles 150 ms apart, S2 after 400 ms = 9 km/h
    drive(&p.detector, 0, &[0, 150, 300], 400);

    let snapshot = next(&mut p.reader).await;
    assert_eq!(snapshot.vehicle_class, VehicleClass::Heavy);
    assert_eq!(snapshot.vehicle_type, "HEAVY (>=3 axles)");
    assert_eq!(snapshot.limit_kmh, 60.0);
    assert_eq!(snapshot.status, ViolationStatus::Normal);

    stop(p).await;
}

#[tokio::test]
async fn test_capture_failure_shows_failed() {
    let mut p = start_pipeline(Config::default(), 20, 1);

    drive(&p.detector, 0, &[0], 30);

    assert_eq!(next(&mut p.reader).await.plate, PlateInfo::Capturing);
    assert_eq!(next(&mut p.reader).await.plate.as_str(), "FAILED");
    assert_eq!(p.metrics.report().captures_failed, 1);

    stop(p).await;
}

#[tokio::test]
async fn test_busy_camera_then_merge() {
    let mut p = start_pipeline(Config::default(), 200, 0);

    drive(&p.detector, 0, &[0], 30);
    assert_eq!(next(&mut p.reader).await.plate, PlateInfo::Capturing);

    drive(&p.detector, 500, &[0], 30);
    let second = next(&mut p.reader).await;
    assert_eq!(second.plate.as_str(), "ERROR");
    assert_eq!(second.violation_id, Some(2));

    // First request's plate lands on the latest snapshot
    let merged = next(&mut p.reader).await;
    assert_eq!(merged.plate.as_str(), "AAA0A00");
    assert_eq!(merged.violation_id, Some(2));
    assert_eq!(p.metrics.captures_busy(), 1);

    stop(p).await;
}

#[tokio::test]
async fn test_out_of_sequence_s2_ignored() {
    let mut p = start_pipeline(Config::default(), 0, 0);

    assert_eq!(
        p.detector.on_edge(SensorEdge::new(SensorId::S2, 10)),
        EdgeOutcome::OutOfSequence
    );
    drive(&p.detector, 100, &[0], 72);

    let snapshot = next(&mut p.reader).await;
    assert_eq!(snapshot.status, ViolationStatus::Normal);
    assert_eq!(p.metrics.edges_out_of_sequence(), 1);
    assert_eq!(p.metrics.passages_completed(), 1);

    stop(p).await;
}

#[tokio::test]
async fn test_on_consume_rearm_in_poll_mode() {
    let config = Config::default()
        .with_rearm_policy(RearmPolicy::OnConsume)
        .with_loop_mode(LoopMode::Poll);
    let mut p = start_pipeline(config, 0, 0);

    drive(&p.detector, 0, &[0], 72);
    next(&mut p.reader).await;

    // Controller consumed and acknowledged the record; next vehicle is accepted
    assert_eq!(
        p.detector.on_edge(SensorEdge::new(SensorId::S1, 1000)),
        EdgeOutcome::PassageStarted
    );
    p.detector.on_edge(SensorEdge::new(SensorId::S2, 1100));
    let snapshot = next(&mut p.reader).await;
    assert!((snapshot.speed_kmh - 36.0).abs() < 1e-9);

    stop(p).await;
}

#[tokio::test]
async fn test_zero_elapsed_passage_rejected() {
    let mut p = start_pipeline(Config::default(), 0, 0);

    drive(&p.detector, 500, &[0], 0);
    drive(&p.detector, 1000, &[0], 72);

    // Only the valid passage reaches the display
    let snapshot = next(&mut p.reader).await;
    assert!((snapshot.speed_kmh - 50.0).abs() < 1e-9);
    assert_eq!(p.metrics.passages_rejected(), 1);

    stop(p).await;
}
