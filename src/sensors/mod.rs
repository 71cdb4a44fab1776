pub mod detection_source;
pub mod iot_sensor;
pub mod json_feed;

pub use detection_source::{
    DetectionError, DetectionSource, FrameAnalyzer, ReplayAnalyzer, SimulatedAnalyzer,
};
pub use iot_sensor::IotSensor;
pub use json_feed::JsonFeedSource;
