use crate::communication::EventSender;
use crate::config::{to_duration, SystemConfig};
use crate::shared_data::{current_timestamp_ms, DirectionalCounts, QueueRecord, SensorReading};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Simulated roadway sensor emitting volume, speed and air-quality readings
/// at random intervals.
pub struct IotSensor {
    location: String,
    sequence: u64,
    min_interval: f64,
    max_interval: f64,
    time_unit: Duration,
    rng: StdRng,
}

impl IotSensor {
    pub fn new(location: impl Into<String>, config: &SystemConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            location: location.into(),
            sequence: 0,
            min_interval: config.sensors.min_interval,
            max_interval: config.sensors.max_interval,
            time_unit: config.time_unit(),
            rng,
        }
    }

    pub fn simulate_reading(&mut self) -> SensorReading {
        let traffic_volume = DirectionalCounts::new(
            self.rng.random_range(5..=50),
            self.rng.random_range(10..=60),
            self.rng.random_range(2..=30),
            self.rng.random_range(7..=45),
        );
        let reading = SensorReading {
            location: self.location.clone(),
            sequence: Some(self.sequence),
            timestamp_ms: current_timestamp_ms(),
            traffic_volume,
            average_speed: self.rng.random_range(20..=60) as f64,
            air_quality: self.rng.random_range(0.0..=1.0),
        };
        self.sequence += 1;
        reading
    }

    /// Wait before the next reading, in time units.
    pub fn next_interval(&mut self) -> f64 {
        self.rng.random_range(self.min_interval..=self.max_interval)
    }

    pub async fn run(mut self, tx: EventSender, shutdown: CancellationToken) {
        log::info!("[Sensor] {} started", self.location);
        while !shutdown.is_cancelled() {
            let reading = self.simulate_reading();
            log::debug!("[Sensor] {} -> {:?}", self.location, reading.traffic_volume);
            if let Err(e) = tx.push(QueueRecord::Sensor(reading)) {
                log::warn!("[Sensor] {}: {}, stopping", self.location, e);
                break;
            }

            let wait = to_duration(self.time_unit, self.next_interval());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }
        log::info!("[Sensor] {} stopped after {} readings", self.location, self.sequence);
    }
}
