// src/shared_data.rs

use crate::global_variables::UNKNOWN_LOCATION;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// One of the four traffic-flow directions tracked at an intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Northbound,
    Southbound,
    Eastbound,
    Westbound,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Northbound,
        Direction::Southbound,
        Direction::Eastbound,
        Direction::Westbound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Northbound => "Northbound",
            Direction::Southbound => "Southbound",
            Direction::Eastbound => "Eastbound",
            Direction::Westbound => "Westbound",
        }
    }

    /// Position within `Direction::ALL`.
    pub fn index(self) -> usize {
        match self {
            Direction::Northbound => 0,
            Direction::Southbound => 1,
            Direction::Eastbound => 2,
            Direction::Westbound => 3,
        }
    }

    /// Parses a direction name as it appears on the wire ("Northbound", "northbound", ...).
    pub fn parse(name: &str) -> Option<Direction> {
        let name = name.trim();
        Direction::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vehicle counts for the four directions, taken from a single sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalCounts {
    #[serde(rename = "Northbound")]
    pub northbound: u32,
    #[serde(rename = "Southbound")]
    pub southbound: u32,
    #[serde(rename = "Eastbound")]
    pub eastbound: u32,
    #[serde(rename = "Westbound")]
    pub westbound: u32,
}

impl DirectionalCounts {
    pub fn new(northbound: u32, southbound: u32, eastbound: u32, westbound: u32) -> Self {
        Self {
            northbound,
            southbound,
            eastbound,
            westbound,
        }
    }

    pub fn get(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Northbound => self.northbound,
            Direction::Southbound => self.southbound,
            Direction::Eastbound => self.eastbound,
            Direction::Westbound => self.westbound,
        }
    }

    pub fn set(&mut self, direction: Direction, count: u32) {
        match direction {
            Direction::Northbound => self.northbound = count,
            Direction::Southbound => self.southbound = count,
            Direction::Eastbound => self.eastbound = count,
            Direction::Westbound => self.westbound = count,
        }
    }

    pub fn increment(&mut self, direction: Direction) {
        self.set(direction, self.get(direction).saturating_add(1));
    }

    pub fn total(&self) -> u64 {
        self.iter().map(|(_, count)| count as u64).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, u32)> + '_ {
        Direction::ALL.into_iter().map(move |d| (d, self.get(d)))
    }

    /// Builds counts from an untyped JSON mapping.
    ///
    /// Unknown direction keys are ignored and negative or non-numeric values are
    /// clamped to zero. Every rejected entry is described in the returned list so
    /// the caller can log it; none of them make the whole mapping invalid.
    pub fn from_raw(raw: &Map<String, Value>) -> (Self, Vec<String>) {
        let mut counts = DirectionalCounts::default();
        let mut rejected = Vec::new();

        for (key, value) in raw {
            let Some(direction) = Direction::parse(key) else {
                rejected.push(format!("unknown direction '{}'", key));
                continue;
            };
            let numeric = value
                .as_i64()
                .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64));
            match numeric {
                Some(n) if n >= 0 => counts.set(direction, n.min(u32::MAX as i64) as u32),
                Some(n) => {
                    rejected.push(format!("negative count {} for {}", n, direction));
                    counts.set(direction, 0);
                }
                None => {
                    rejected.push(format!("non-numeric count {} for {}", value, direction));
                    counts.set(direction, 0);
                }
            }
        }

        (counts, rejected)
    }
}

/// A periodic reading from a roadway sensor. Monitoring only: readings never drive timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub location: String,
    /// Monotonic per sensor, starting at 0. `None` when the producer does not number its records.
    pub sequence: Option<u64>,
    pub timestamp_ms: u64,
    pub traffic_volume: DirectionalCounts,
    pub average_speed: f64,
    /// In [0, 1].
    pub air_quality: f64,
}

/// Directional counts and the emergency flag from one analyzed video frame.
///
/// Both come from the same frame and travel together as a single queue entry.
/// `directional_counts` is only `None` for records decoded at the JSON boundary
/// that arrived without counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub location: String,
    pub sequence: Option<u64>,
    pub timestamp_ms: u64,
    pub directional_counts: Option<DirectionalCounts>,
    pub emergency_vehicle_detected: bool,
}

/// Everything that travels on the event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueRecord {
    Sensor(SensorReading),
    Detection(DetectionEvent),
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("record is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("field '{0}' has the wrong type")]
    WrongType(&'static str),

    #[error("record carries neither directional counts, traffic volume nor an emergency flag")]
    Unclassifiable,
}

impl QueueRecord {
    pub fn location(&self) -> &str {
        match self {
            QueueRecord::Sensor(reading) => &reading.location,
            QueueRecord::Detection(event) => &event.location,
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        match self {
            QueueRecord::Sensor(reading) => reading.sequence,
            QueueRecord::Detection(event) => event.sequence,
        }
    }

    /// Decodes a record from the untyped dictionary shape used by external producers.
    ///
    /// Classification goes by field presence: `directional_counts` makes a detection,
    /// otherwise `traffic_volume` makes a sensor reading, otherwise a bare
    /// `emergency_vehicle_detected` flag makes a detection without counts.
    pub fn from_json(line: &str) -> Result<QueueRecord, RecordError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| RecordError::InvalidJson(e.to_string()))?;
        let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

        let location = obj
            .get("location")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_LOCATION)
            .to_string();
        let sequence = obj.get("sequence").and_then(Value::as_u64);
        // External producers stamp records with float seconds since the epoch.
        let timestamp_ms = obj
            .get("timestamp")
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| (secs * 1000.0) as u64)
            .unwrap_or_else(current_timestamp_ms);
        let emergency = obj
            .get("emergency_vehicle_detected")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if let Some(raw_counts) = obj.get("directional_counts") {
            let directional_counts = match raw_counts.as_object() {
                Some(map) => Some(sanitized_counts(&location, map)),
                None => {
                    log::warn!(
                        "[Decoder] {}: directional_counts is not a mapping, treating counts as absent",
                        location
                    );
                    None
                }
            };
            return Ok(QueueRecord::Detection(DetectionEvent {
                location,
                sequence,
                timestamp_ms,
                directional_counts,
                emergency_vehicle_detected: emergency,
            }));
        }

        if let Some(raw_volume) = obj.get("traffic_volume") {
            let map = raw_volume
                .as_object()
                .ok_or(RecordError::WrongType("traffic_volume"))?;
            let traffic_volume = sanitized_counts(&location, map);
            let average_speed = obj
                .get("average_speed")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .max(0.0);
            let air_quality = obj
                .get("air_quality")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            return Ok(QueueRecord::Sensor(SensorReading {
                location,
                sequence,
                timestamp_ms,
                traffic_volume,
                average_speed,
                air_quality,
            }));
        }

        if obj.contains_key("emergency_vehicle_detected") {
            return Ok(QueueRecord::Detection(DetectionEvent {
                location,
                sequence,
                timestamp_ms,
                directional_counts: None,
                emergency_vehicle_detected: emergency,
            }));
        }

        Err(RecordError::Unclassifiable)
    }
}

fn sanitized_counts(location: &str, map: &Map<String, Value>) -> DirectionalCounts {
    let (counts, rejected) = DirectionalCounts::from_raw(map);
    for reason in rejected {
        log::warn!("[Decoder] {}: ignoring {}", location, reason);
    }
    counts
}

/// Milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_accepts_any_case() {
        assert_eq!(Direction::parse("eastbound"), Some(Direction::Eastbound));
        assert_eq!(Direction::parse(" Westbound "), Some(Direction::Westbound));
        assert_eq!(Direction::parse("Up"), None);
    }

    #[test]
    fn from_raw_clamps_negatives_and_skips_unknown_keys() {
        let raw = json!({
            "Northbound": 4,
            "Southbound": -3,
            "Eastbound": "many",
            "Diagonal": 9
        });
        let (counts, rejected) = DirectionalCounts::from_raw(raw.as_object().unwrap());

        assert_eq!(counts, DirectionalCounts::new(4, 0, 0, 0));
        assert_eq!(rejected.len(), 3);
    }

    #[test]
    fn directional_counts_make_a_detection() {
        let line = r#"{"location":"Intersection Y","directional_counts":{"Northbound":1,"Southbound":2,"Eastbound":3,"Westbound":4},"emergency_vehicle_detected":true}"#;
        match QueueRecord::from_json(line).unwrap() {
            QueueRecord::Detection(event) => {
                assert_eq!(event.location, "Intersection Y");
                assert_eq!(event.directional_counts, Some(DirectionalCounts::new(1, 2, 3, 4)));
                assert!(event.emergency_vehicle_detected);
            }
            other => panic!("expected a detection, got {:?}", other),
        }
    }

    #[test]
    fn sensor_shape_with_false_flag_stays_a_sensor_reading() {
        let line = r#"{"timestamp":1700000000.5,"location":"Intersection B","traffic_volume":{"Northbound":5,"Southbound":10,"Eastbound":2,"Westbound":7},"average_speed":42,"air_quality":0.3,"emergency_vehicle_detected":false}"#;
        match QueueRecord::from_json(line).unwrap() {
            QueueRecord::Sensor(reading) => {
                assert_eq!(reading.timestamp_ms, 1_700_000_000_500);
                assert_eq!(reading.traffic_volume.total(), 24);
                assert_eq!(reading.average_speed, 42.0);
                assert_eq!(reading.sequence, None);
            }
            other => panic!("expected a sensor reading, got {:?}", other),
        }
    }

    #[test]
    fn bare_emergency_flag_is_a_detection_without_counts() {
        let record = QueueRecord::from_json(r#"{"emergency_vehicle_detected":true}"#).unwrap();
        match record {
            QueueRecord::Detection(event) => {
                assert_eq!(event.location, UNKNOWN_LOCATION);
                assert!(event.directional_counts.is_none());
                assert!(event.emergency_vehicle_detected);
            }
            other => panic!("expected a detection, got {:?}", other),
        }
    }

    #[test]
    fn malformed_counts_are_treated_as_absent() {
        let record =
            QueueRecord::from_json(r#"{"location":"A","directional_counts":[1,2,3,4]}"#).unwrap();
        match record {
            QueueRecord::Detection(event) => assert!(event.directional_counts.is_none()),
            other => panic!("expected a detection, got {:?}", other),
        }
    }

    #[test]
    fn unrecognised_records_are_rejected() {
        assert_eq!(
            QueueRecord::from_json(r#"{"location":"A"}"#),
            Err(RecordError::Unclassifiable)
        );
        assert_eq!(QueueRecord::from_json("[1,2]"), Err(RecordError::NotAnObject));
        assert!(matches!(
            QueueRecord::from_json("not json"),
            Err(RecordError::InvalidJson(_))
        ));
    }
}
