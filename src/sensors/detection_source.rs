use crate::communication::EventSender;
use crate::config::{to_duration, SystemConfig};
use crate::global_variables::{
    DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, EMERGENCY_LABEL, VEHICLE_LABELS,
};
use crate::shared_data::{current_timestamp_ms, DetectionEvent, Direction, DirectionalCounts, QueueRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("end of video stream")]
    EndOfStream,

    #[error("frame analysis failed: {0}")]
    Analysis(String),
}

/// Pixel coordinates of a detected object, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Everything the vision model reported for one video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<Detection>,
}

/// Black-box vision pipeline: yields one analyzed frame per call.
pub trait FrameAnalyzer: Send {
    fn next_frame(&mut self) -> Result<FrameAnalysis, DetectionError>;
}

/// Maps a box to a direction by the dominant axis of its offset from the frame centre.
///
/// Horizontal offsets give Westbound (left) or Eastbound (right), vertical
/// offsets give Northbound (top) or Southbound (bottom).
pub fn estimate_direction(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Direction {
    let half_w = frame_width.max(1) as f32 / 2.0;
    let half_h = frame_height.max(1) as f32 / 2.0;
    let (cx, cy) = bbox.center();
    let dx = (cx - half_w) / half_w;
    let dy = (cy - half_h) / half_h;

    if dx.abs() >= dy.abs() {
        if dx < 0.0 {
            Direction::Westbound
        } else {
            Direction::Eastbound
        }
    } else if dy < 0.0 {
        Direction::Northbound
    } else {
        Direction::Southbound
    }
}

/// Counts vehicles per direction and checks for a confident emergency-vehicle detection.
pub fn summarize_frame(frame: &FrameAnalysis, emergency_threshold: f32) -> (DirectionalCounts, bool) {
    let mut counts = DirectionalCounts::default();
    let mut emergency = false;
    for detection in &frame.detections {
        if VEHICLE_LABELS.contains(&detection.label.as_str()) {
            counts.increment(estimate_direction(
                &detection.bbox,
                frame.frame_width,
                frame.frame_height,
            ));
        }
        if detection.label == EMERGENCY_LABEL && detection.confidence > emergency_threshold {
            emergency = true;
        }
    }
    (counts, emergency)
}

/// Stand-in for the vision model: random vehicles and the occasional ambulance.
pub struct SimulatedAnalyzer {
    rng: StdRng,
    frame_width: u32,
    frame_height: u32,
    emergency_probability: f64,
}

impl SimulatedAnalyzer {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            emergency_probability: 0.05,
        }
    }

    fn random_box(&mut self) -> BoundingBox {
        let w = self.rng.random_range(40.0..120.0);
        let h = self.rng.random_range(30.0..90.0);
        let x1 = self.rng.random_range(0.0..(self.frame_width as f32 - w));
        let y1 = self.rng.random_range(0.0..(self.frame_height as f32 - h));
        BoundingBox {
            x1,
            y1,
            x2: x1 + w,
            y2: y1 + h,
        }
    }
}

impl FrameAnalyzer for SimulatedAnalyzer {
    fn next_frame(&mut self) -> Result<FrameAnalysis, DetectionError> {
        let vehicles = self.rng.random_range(0..=12);
        let mut detections = Vec::with_capacity(vehicles + 1);
        for _ in 0..vehicles {
            let label = VEHICLE_LABELS[self.rng.random_range(0..VEHICLE_LABELS.len())];
            detections.push(Detection {
                label: label.to_string(),
                confidence: self.rng.random_range(0.5..1.0),
                bbox: self.random_box(),
            });
        }
        if self.rng.random_bool(self.emergency_probability) {
            detections.push(Detection {
                label: EMERGENCY_LABEL.to_string(),
                confidence: self.rng.random_range(0.5..1.0),
                bbox: self.random_box(),
            });
        }
        Ok(FrameAnalysis {
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            detections,
        })
    }
}

/// Plays back pre-recorded frame analyses, then reports the end of the stream.
pub struct ReplayAnalyzer {
    frames: VecDeque<FrameAnalysis>,
}

impl ReplayAnalyzer {
    pub fn new(frames: impl IntoIterator<Item = FrameAnalysis>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameAnalyzer for ReplayAnalyzer {
    fn next_frame(&mut self) -> Result<FrameAnalysis, DetectionError> {
        self.frames.pop_front().ok_or(DetectionError::EndOfStream)
    }
}

/// Turns analyzed frames into detection events, one queue record per frame.
pub struct DetectionSource<A: FrameAnalyzer> {
    location: String,
    analyzer: A,
    emergency_threshold: f32,
    frame_interval: Duration,
    sequence: u64,
}

impl<A: FrameAnalyzer> DetectionSource<A> {
    pub fn new(location: impl Into<String>, analyzer: A, config: &SystemConfig) -> Self {
        Self {
            location: location.into(),
            analyzer,
            emergency_threshold: config.detection.emergency_confidence_threshold,
            frame_interval: to_duration(config.time_unit(), config.detection.frame_interval),
            sequence: 0,
        }
    }

    /// Runs until shutdown or until the analyzer fails.
    ///
    /// An analyzer failure ends only this producer; the error is logged here and
    /// returned so the owner can see why. Returns the number of frames published.
    pub async fn run(mut self, tx: EventSender, shutdown: CancellationToken) -> Result<u64, DetectionError> {
        log::info!("[Detection] {} started", self.location);
        while !shutdown.is_cancelled() {
            let frame = match self.analyzer.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!(
                        "[Detection] {}: {} after {} frames, stopping detection source",
                        self.location, e, self.sequence
                    );
                    return Err(e);
                }
            };
            let (counts, emergency) = summarize_frame(&frame, self.emergency_threshold);
            let event = DetectionEvent {
                location: self.location.clone(),
                sequence: Some(self.sequence),
                timestamp_ms: current_timestamp_ms(),
                directional_counts: Some(counts),
                emergency_vehicle_detected: emergency,
            };
            if tx.push(QueueRecord::Detection(event)).is_err() {
                log::warn!("[Detection] {}: event queue closed, stopping", self.location);
                break;
            }
            self.sequence += 1;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.frame_interval) => {}
            }
        }
        log::info!("[Detection] {} stopped after {} frames", self.location, self.sequence);
        Ok(self.sequence)
    }
}
