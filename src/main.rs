//! Radar controller - two-sensor vehicle speed enforcement
//!
//! Module structure:
//! - `domain/` - Core types (edges, passages, snapshots, capture contract)
//! - `io/` - External interfaces (sensor input, camera, MQTT, HTTP)
//! - `services/` - Pipeline (EdgeDetector, Classifier, Controller, display channel)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use radar_controller::domain::Uptime;
use radar_controller::infra::{Config, Metrics};
use radar_controller::io::{
    camera_from_config, capture_channel, run_display, start_http_server, DisplaySink, EdgeListener,
    HttpState, LogDisplay, MqttDisplay, CAPTURE_CHANNEL_SIZE,
};
use radar_controller::services::{display_channel, passage_queue, Controller, EdgeDetector};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Radar controller - axle-sensor speed enforcement
#[derive(Parser, Debug)]
#[command(name = "radar-controller", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls the level, default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "radar-controller starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path());
    let config = Config::load_from_path(&config_path);
    config.validate().context("invalid configuration")?;

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        sensor_distance_mm = %config.sensor_distance_mm(),
        debounce_ms = %config.debounce_ms(),
        queue_capacity = %config.queue_capacity(),
        rearm = ?config.rearm_policy(),
        light_kmh = %config.light_limit_kmh(),
        heavy_kmh = %config.heavy_limit_kmh(),
        warning_percent = %config.warning_percent(),
        loop_mode = ?config.loop_mode(),
        capture_mode = ?config.capture_mode(),
        sensors = %config.sensor_listen_addr(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let uptime = Uptime::start();

    // Sensor input must be up before anything else runs
    let listener = EdgeListener::bind(config.sensor_listen_addr()).await?;

    let (producer, consumer) = passage_queue(config.queue_capacity(), metrics.clone());
    let (detector, rearm) = EdgeDetector::from_config(&config, producer, metrics.clone());
    let detector = Arc::new(detector);

    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        listener.run(detector, uptime, listener_shutdown).await;
    });

    let (capture_tx, capture_rx) = capture_channel(CAPTURE_CHANNEL_SIZE);
    let camera = camera_from_config(&config, capture_tx).context("failed to create camera")?;

    let (publisher, reader) = display_channel(metrics.clone());

    let mut sinks: Vec<Arc<dyn DisplaySink>> = Vec::new();
    if config.display_log_enabled() {
        sinks.push(Arc::new(LogDisplay));
    }
    if config.mqtt_enabled() {
        let mqtt = MqttDisplay::new(&config);
        info!(host = %config.mqtt_host(), topic = %mqtt.topic(), "mqtt_display_enabled");
        sinks.push(Arc::new(mqtt));
    }
    for sink in sinks {
        tokio::spawn(run_display(reader.clone(), sink, shutdown_rx.clone()));
    }

    let http_port = config.prometheus_port();
    if http_port > 0 {
        let state = HttpState {
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
            display: publisher.subscribe(),
            camera: Some(camera.clone()),
        };
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(http_port, state, http_shutdown).await {
                error!(error = %e, "http_server_error");
            }
        });
    }

    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        // First tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let mut controller = Controller::new(&config, camera, publisher, rearm, metrics);
    controller.run(consumer, capture_rx, shutdown_rx).await;

    info!("radar-controller shutdown complete");
    Ok(())
}
