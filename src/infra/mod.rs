//! Infrastructure - configuration and metrics
//!
//! - `config` - Application configuration (TOML loading, defaults, validation)
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod metrics;

pub use config::{CaptureMode, Config, LoopMode, RearmPolicy};
pub use metrics::Metrics;
