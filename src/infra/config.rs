//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument (handled by the binary)
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

/// When the detector returns to Idle after completing a passage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RearmPolicy {
    /// The edge handler that completes a passage rearms the detector itself
    Immediate,
    /// The detector waits until the control loop has consumed the record
    OnConsume,
}

/// How the control loop waits for work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Single wait on passage queue, capture events and shutdown
    Event,
    /// Non-blocking checks followed by a fixed sleep
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Sim,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "br101-km42")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "radar".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadarConfig {
    /// Separation between S1 and S2 in millimetres
    pub sensor_distance_mm: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_rearm")]
    pub rearm: RearmPolicy,
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_queue_capacity() -> usize {
    10
}

fn default_rearm() -> RearmPolicy {
    RearmPolicy::Immediate
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub light_kmh: f64,
    pub heavy_kmh: f64,
    /// Warning threshold as a percentage of the applicable limit
    pub warning_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_loop_mode")]
    pub mode: LoopMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_loop_mode() -> LoopMode {
    LoopMode::Event
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { mode: default_loop_mode(), poll_interval_ms: default_poll_interval_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorsConfig {
    /// Address of the edge input listener
    #[serde(default = "default_sensor_listen_addr")]
    pub listen_addr: String,
}

fn default_sensor_listen_addr() -> String {
    "0.0.0.0:7600".to_string()
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self { listen_addr: default_sensor_listen_addr() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_mode")]
    pub mode: CaptureMode,
    /// Camera service endpoint (http mode)
    #[serde(default)]
    pub http_url: String,
    #[serde(default = "default_capture_timeout_ms")]
    pub timeout_ms: u64,
    /// Simulated capture latency
    #[serde(default = "default_sim_latency_ms")]
    pub sim_latency_ms: u64,
    /// Plates returned by the simulated camera, round-robin
    #[serde(default = "default_sim_plates")]
    pub sim_plates: Vec<String>,
    /// Every Nth simulated capture fails (0 = never)
    #[serde(default)]
    pub sim_fail_every: u64,
}

fn default_capture_mode() -> CaptureMode {
    CaptureMode::Sim
}

fn default_capture_timeout_ms() -> u64 {
    5000
}

fn default_sim_latency_ms() -> u64 {
    500
}

fn default_sim_plates() -> Vec<String> {
    vec!["AAA0A00".to_string(), "BBB1B11".to_string(), "CCC2C22".to_string()]
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: default_capture_mode(),
            http_url: String::new(),
            timeout_ms: default_capture_timeout_ms(),
            sim_latency_ms: default_sim_latency_ms(),
            sim_plates: default_sim_plates(),
            sim_fail_every: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Render every snapshot to the log
    #[serde(default = "default_true")]
    pub log_enabled: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { log_enabled: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// HTTP port for /metrics and /status (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Publish display snapshots over MQTT
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic for display snapshots (retained, QoS 0)
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_status_topic() -> String {
    "radar/status".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            status_topic: default_status_topic(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub radar: RadarConfig,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    sensor_distance_mm: u32,
    debounce_ms: u64,
    queue_capacity: usize,
    rearm_policy: RearmPolicy,
    light_limit_kmh: f64,
    heavy_limit_kmh: f64,
    warning_percent: f64,
    loop_mode: LoopMode,
    poll_interval_ms: u64,
    sensor_listen_addr: String,
    capture_mode: CaptureMode,
    capture_url: String,
    capture_timeout_ms: u64,
    sim_latency_ms: u64,
    sim_plates: Vec<String>,
    sim_fail_every: u64,
    display_log_enabled: bool,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_status_topic: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            sensor_distance_mm: 1000,
            debounce_ms: default_debounce_ms(),
            queue_capacity: default_queue_capacity(),
            rearm_policy: default_rearm(),
            light_limit_kmh: 80.0,
            heavy_limit_kmh: 60.0,
            warning_percent: 90.0,
            loop_mode: default_loop_mode(),
            poll_interval_ms: default_poll_interval_ms(),
            sensor_listen_addr: default_sensor_listen_addr(),
            capture_mode: default_capture_mode(),
            capture_url: String::new(),
            capture_timeout_ms: default_capture_timeout_ms(),
            sim_latency_ms: default_sim_latency_ms(),
            sim_plates: default_sim_plates(),
            sim_fail_every: 0,
            display_log_enabled: true,
            metrics_interval_secs: 10,
            prometheus_port: default_prometheus_port(),
            mqtt_enabled: false,
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_status_topic: default_status_topic(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Config file path when none is given on the command line
    pub fn resolve_config_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config/dev.toml".to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            site_id: toml_config.site.id,
            sensor_distance_mm: toml_config.radar.sensor_distance_mm,
            debounce_ms: toml_config.radar.debounce_ms,
            queue_capacity: toml_config.radar.queue_capacity,
            rearm_policy: toml_config.radar.rearm,
            light_limit_kmh: toml_config.limits.light_kmh,
            heavy_limit_kmh: toml_config.limits.heavy_kmh,
            warning_percent: toml_config.limits.warning_percent,
            loop_mode: toml_config.control.mode,
            poll_interval_ms: toml_config.control.poll_interval_ms,
            sensor_listen_addr: toml_config.sensors.listen_addr,
            capture_mode: toml_config.capture.mode,
            capture_url: toml_config.capture.http_url,
            capture_timeout_ms: toml_config.capture.timeout_ms,
            sim_latency_ms: toml_config.capture.sim_latency_ms,
            sim_plates: toml_config.capture.sim_plates,
            sim_fail_every: toml_config.capture.sim_fail_every,
            display_log_enabled: toml_config.display.log_enabled,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_status_topic: toml_config.mqtt.status_topic,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sensor_distance_mm == 0 {
            bail!("radar.sensor_distance_mm must be greater than 0");
        }
        if self.queue_capacity == 0 {
            bail!("radar.queue_capacity must be greater than 0");
        }
        if !(self.light_limit_kmh > 0.0 && self.heavy_limit_kmh > 0.0) {
            bail!("limits.light_kmh and limits.heavy_kmh must be greater than 0");
        }
        if !(self.warning_percent > 0.0 && self.warning_percent <= 100.0) {
            bail!("limits.warning_percent must be in (0, 100], got {}", self.warning_percent);
        }
        if self.poll_interval_ms == 0 {
            bail!("control.poll_interval_ms must be greater than 0");
        }
        if self.metrics_interval_secs == 0 {
            bail!("metrics.interval_secs must be greater than 0");
        }
        if self.capture_mode == CaptureMode::Http && self.capture_url.is_empty() {
            bail!("capture.http_url is required when capture.mode = \"http\"");
        }
        if self.capture_mode == CaptureMode::Sim && self.sim_plates.is_empty() {
            bail!("capture.sim_plates must not be empty when capture.mode = \"sim\"");
        }
        Ok(())
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn sensor_distance_mm(&self) -> u32 {
        self.sensor_distance_mm
    }

    pub fn sensor_distance_m(&self) -> f64 {
        f64::from(self.sensor_distance_mm) / 1000.0
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn rearm_policy(&self) -> RearmPolicy {
        self.rearm_policy
    }

    pub fn light_limit_kmh(&self) -> f64 {
        self.light_limit_kmh
    }

    pub fn heavy_limit_kmh(&self) -> f64 {
        self.heavy_limit_kmh
    }

    pub fn warning_percent(&self) -> f64 {
        self.warning_percent
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn sensor_listen_addr(&self) -> &str {
        &self.sensor_listen_addr
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture_mode
    }

    pub fn capture_url(&self) -> &str {
        &self.capture_url
    }

    pub fn capture_timeout_ms(&self) -> u64 {
        self.capture_timeout_ms
    }

    pub fn sim_latency_ms(&self) -> u64 {
        self.sim_latency_ms
    }

    pub fn sim_plates(&self) -> &[String] {
        &self.sim_plates
    }

    pub fn sim_fail_every(&self) -> u64 {
        self.sim_fail_every
    }

    pub fn display_log_enabled(&self) -> bool {
        self.display_log_enabled
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_status_topic(&self) -> &str {
        &self.mqtt_status_topic
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to select the rearm policy
    pub fn with_rearm_policy(mut self, policy: RearmPolicy) -> Self {
        self.rearm_policy = policy;
        self
    }

    /// Builder method to select the control loop mode
    pub fn with_loop_mode(mut self, mode: LoopMode) -> Self {
        self.loop_mode = mode;
        self
    }

    /// Builder method to set the simulated camera behaviour
    pub fn with_sim_capture(mut self, latency_ms: u64, plates: Vec<String>, fail_every: u64) -> Self {
        self.sim_latency_ms = latency_ms;
        self.sim_plates = plates;
        self.sim_fail_every = fail_every;
        self
    }

    /// Builder method to set the passage queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}
