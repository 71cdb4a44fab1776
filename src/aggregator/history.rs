use crate::shared_data::{Direction, DirectionalCounts, SensorReading};
use serde::{Deserialize, Serialize};

/// One aggregated snapshot of directional counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp_ms: u64,
    pub location: String,
    pub counts: DirectionalCounts,
}

/// Append-only, arrival-ordered record of directional counts for one run.
#[derive(Debug, Clone, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vehicles seen per direction over the whole log.
    pub fn totals(&self) -> [(Direction, u64); 4] {
        Direction::ALL.map(|d| {
            let sum: u64 = self.entries.iter().map(|e| e.counts.get(d) as u64).sum();
            (d, sum)
        })
    }
}

/// Running monitoring figures for one sensor location.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorSummary {
    pub readings: u64,
    /// Readings that did not follow the previous sequence number.
    pub sequence_gaps: u64,
    pub last_sequence: Option<u64>,
    pub last_timestamp_ms: u64,
    pub last_average_speed: f64,
    pub last_air_quality: f64,
    pub volume_totals: [u64; 4],
}

impl SensorSummary {
    /// Gap tracking only applies to numbered readings; unnumbered ones are just counted.
    pub fn record(&mut self, reading: &SensorReading) {
        if let (Some(last), Some(sequence)) = (self.last_sequence, reading.sequence) {
            if last.checked_add(1) != Some(sequence) {
                self.sequence_gaps += 1;
                log::warn!(
                    "[Aggregator] {}: sequence jumped from {} to {}",
                    reading.location, last, sequence
                );
            }
        }
        self.readings += 1;
        if reading.sequence.is_some() {
            self.last_sequence = reading.sequence;
        }
        self.last_timestamp_ms = reading.timestamp_ms;
        self.last_average_speed = reading.average_speed;
        self.last_air_quality = reading.air_quality;
        for (direction, count) in reading.traffic_volume.iter() {
            self.volume_totals[direction.index()] += count as u64;
        }
    }

    pub fn mean_volume(&self, direction: Direction) -> f64 {
        if self.readings == 0 {
            return 0.0;
        }
        self.volume_totals[direction.index()] as f64 / self.readings as f64
    }
}
