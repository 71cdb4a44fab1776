use crate::aggregator::history::{HistoryEntry, HistoryLog, SensorSummary};
use crate::communication::EventReceiver;
use crate::config::SystemConfig;
use crate::control_system::{ControllerError, SignalControllerHandle};
use crate::shared_data::{current_timestamp_ms, DetectionEvent, QueueRecord};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("signal controller rejected the request: {0}")]
    Controller(#[from] ControllerError),
}

/// What the aggregator hands back once its loop has ended.
#[derive(Debug, Default)]
pub struct AggregatorOutcome {
    pub history: HistoryLog,
    pub emergency_vehicle_count: u64,
    pub sensors: BTreeMap<String, SensorSummary>,
    pub records_processed: u64,
    /// Records still queued when shutdown was requested.
    pub records_discarded: usize,
}

/// Single consumer of the event queue: classifies records, keeps the history
/// and drives the signal controller.
pub struct Aggregator {
    controller: SignalControllerHandle,
    history: HistoryLog,
    sensors: BTreeMap<String, SensorSummary>,
    emergency_vehicle_count: u64,
    records_processed: u64,
    emergency_preemption: bool,
    override_duration: f64,
}

impl Aggregator {
    pub fn new(controller: SignalControllerHandle, config: &SystemConfig) -> Self {
        Self {
            controller,
            history: HistoryLog::new(),
            sensors: BTreeMap::new(),
            emergency_vehicle_count: 0,
            records_processed: 0,
            emergency_preemption: config.emergency_preemption,
            override_duration: config.timing.override_duration,
        }
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn emergency_vehicle_count(&self) -> u64 {
        self.emergency_vehicle_count
    }

    pub fn sensor_summary(&self, location: &str) -> Option<&SensorSummary> {
        self.sensors.get(location)
    }

    pub fn process_record(&mut self, record: QueueRecord) -> Result<(), AggregatorError> {
        self.records_processed += 1;
        match record {
            QueueRecord::Sensor(reading) => {
                log::debug!(
                    "[Aggregator] sensor reading #{:?} from {}: {:?}",
                    reading.sequence, reading.location, reading.traffic_volume
                );
                self.sensors
                    .entry(reading.location.clone())
                    .or_default()
                    .record(&reading);
                Ok(())
            }
            QueueRecord::Detection(event) => self.process_detection(event),
        }
    }

    fn process_detection(&mut self, event: DetectionEvent) -> Result<(), AggregatorError> {
        let mut first_error = None;

        match event.directional_counts {
            Some(counts) => {
                log::info!(
                    "[Aggregator] {}: directional vehicle counts {:?}",
                    event.location, counts
                );
                self.history.append(HistoryEntry {
                    timestamp_ms: current_timestamp_ms(),
                    location: event.location.clone(),
                    counts,
                });
                if let Err(e) = self.controller.adjust_timing(counts) {
                    first_error = first_error.or(Some(e));
                }
            }
            None => log::warn!(
                "[Aggregator] {}: detection #{:?} has no directional counts, timing left unchanged",
                event.location, event.sequence
            ),
        }

        if event.emergency_vehicle_detected {
            self.emergency_vehicle_count += 1;
            log::warn!(
                "[Aggregator] {}: emergency vehicle detected. Total count: {}",
                event.location, self.emergency_vehicle_count
            );
            if self.emergency_preemption {
                if let Err(e) = self.controller.override_signal(self.override_duration) {
                    first_error = first_error.or(Some(e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Drains the queue until shutdown. A failing record is logged and skipped.
    pub async fn run(mut self, mut receiver: EventReceiver) -> AggregatorOutcome {
        log::info!("[Aggregator] waiting for records");
        while let Some(record) = receiver.pop().await {
            let location = record.location().to_string();
            if let Err(e) = self.process_record(record) {
                log::error!("[Aggregator] error processing record from {}: {}", location, e);
            }
        }

        let records_discarded = receiver.pending();
        if records_discarded > 0 {
            log::info!(
                "[Aggregator] discarding {} records still queued at shutdown",
                records_discarded
            );
        }
        log::info!(
            "[Aggregator] stopped after {} records, {} history entries",
            self.records_processed,
            self.history.len()
        );

        AggregatorOutcome {
            history: self.history,
            emergency_vehicle_count: self.emergency_vehicle_count,
            sensors: self.sensors,
            records_processed: self.records_processed,
            records_discarded,
        }
    }
}
