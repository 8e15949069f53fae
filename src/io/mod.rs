//! IO modules - external system interfaces
//!
//! - `edge_listener` - TCP input for axle-sensor edges
//! - `camera` - Plate-capture cameras (simulated and HTTP)
//! - `display_sink` - Display consumers and the log renderer
//! - `mqtt_egress` - MQTT display publisher
//! - `prometheus` - HTTP endpoint (metrics, status, manual capture)

pub mod camera;
pub mod display_sink;
pub mod edge_listener;
pub mod mqtt_egress;
pub mod prometheus;

pub use camera::{camera_from_config, capture_channel, CaptureGateway, CAPTURE_CHANNEL_SIZE};
pub use display_sink::{run_display, DisplaySink, LogDisplay};
pub use edge_listener::{EdgeListener, SensorInitError};
pub use mqtt_egress::MqttDisplay;
pub use prometheus::{start_http_server, HttpState};
