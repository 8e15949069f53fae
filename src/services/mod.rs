//! Services - the speed-enforcement pipeline
//!
//! - `edge_detector` - Axle-sensor state machine (edge context)
//! - `passage_queue` - Bounded hand-off from edge context to control loop
//! - `classifier` - Speed computation and violation status
//! - `display` - Latest-value display channel
//! - `controller` - Control loop: classify, capture, publish

pub mod classifier;
pub mod controller;
pub mod display;
pub mod edge_detector;
pub mod passage_queue;

pub use classifier::{Classification, Classifier, ClassifyError};
pub use controller::Controller;
pub use display::{display_channel, DisplayPublisher, DisplayReader};
pub use edge_detector::{EdgeDetector, EdgeOutcome, RearmHandle};
pub use passage_queue::{passage_queue, PassageConsumer, PassageProducer, PushError};
