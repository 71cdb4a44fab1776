use crate::aggregator::{Aggregator, AggregatorOutcome};
use crate::communication::{event_queue, EventSender};
use crate::config::{ConfigError, SystemConfig};
use crate::control_system::{SignalController, SignalControllerHandle, SignalSnapshot};
use crate::monitoring::RunReport;
use crate::sensors::{DetectionSource, FrameAnalyzer, IotSensor, JsonFeedSource, SimulatedAnalyzer};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Wires producers, the event queue, the aggregator and the signal controller together.
pub struct CentralServer {
    config: SystemConfig,
}

/// A started system. Dropping it without `shutdown` leaves the tasks running
/// until the runtime stops.
pub struct RunningSystem {
    stop: CancellationToken,
    producers_stop: CancellationToken,
    aggregator_stop: CancellationToken,
    controller_stop: CancellationToken,
    producers: Vec<JoinHandle<()>>,
    aggregator: JoinHandle<AggregatorOutcome>,
    controller: JoinHandle<SignalSnapshot>,
    controller_handle: SignalControllerHandle,
    sender: EventSender,
}

impl CentralServer {
    pub fn new(config: SystemConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Starts with the detection input named in the config: the JSON-lines feed
    /// when `detection.feed_path` is set, the simulated analyzer otherwise.
    pub fn start(self) -> RunningSystem {
        match self.config.detection.feed_path.clone() {
            Some(path) => {
                let feed = JsonFeedSource::new(path, self.config.units(self.config.detection.frame_interval));
                self.launch(move |tx, stop| {
                    tokio::spawn(async move {
                        if let Ok(published) = feed.run(tx, stop).await {
                            log::info!("[Server] feed finished after {} records", published);
                        }
                    })
                })
            }
            None => {
                let analyzer = SimulatedAnalyzer::new(self.config.seed);
                self.start_with_analyzer(analyzer)
            }
        }
    }

    /// Starts with a caller-supplied vision pipeline.
    pub fn start_with_analyzer<A: FrameAnalyzer + 'static>(self, analyzer: A) -> RunningSystem {
        let source = DetectionSource::new(self.config.intersection.clone(), analyzer, &self.config);
        self.launch(move |tx, stop| {
            tokio::spawn(async move {
                // Failures are logged by the source itself and end only this producer.
                if let Ok(frames) = source.run(tx, stop).await {
                    log::info!("[Server] detection finished after {} frames", frames);
                }
            })
        })
    }

    fn launch<F>(self, spawn_detection: F) -> RunningSystem
    where
        F: FnOnce(EventSender, CancellationToken) -> JoinHandle<()>,
    {
        let config = self.config;
        let stop = CancellationToken::new();
        let producers_stop = stop.child_token();
        let aggregator_stop = stop.child_token();
        let controller_stop = stop.child_token();

        let (sender, receiver) = event_queue(aggregator_stop.clone());
        let (controller_handle, controller) = SignalController::spawn(&config, controller_stop.clone());

        let mut producers = Vec::new();
        for (i, location) in config.sensors.locations.iter().enumerate() {
            let seed = config.seed.map(|s| s.wrapping_add(i as u64 + 1));
            let sensor = IotSensor::new(location.clone(), &config, seed);
            producers.push(tokio::spawn(sensor.run(sender.clone(), producers_stop.clone())));
        }
        producers.push(spawn_detection(sender.clone(), producers_stop.clone()));

        let aggregator = Aggregator::new(controller_handle.clone(), &config);
        let aggregator = tokio::spawn(aggregator.run(receiver));

        log::info!(
            "[Server] {} running with {} sensors",
            config.intersection,
            config.sensors.locations.len()
        );

        RunningSystem {
            stop,
            producers_stop,
            aggregator_stop,
            controller_stop,
            producers,
            aggregator,
            controller,
            controller_handle,
            sender,
        }
    }
}

impl RunningSystem {
    /// Handle for operator commands such as a manual override.
    pub fn controller(&self) -> &SignalControllerHandle {
        &self.controller_handle
    }

    /// Extra producer endpoint for records coming from outside the process.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Token that stops every task at once, without the ordered hand-over.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Stops producers, then the aggregator, then the controller, and collects the results.
    pub async fn shutdown(self) -> RunReport {
        log::info!("[Server] stopping producers");
        self.producers_stop.cancel();
        for producer in self.producers {
            if let Err(e) = producer.await {
                log::error!("[Server] producer task failed: {}", e);
            }
        }

        log::info!("[Server] stopping aggregator");
        self.aggregator_stop.cancel();
        let outcome = match self.aggregator.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("[Server] aggregator task failed: {}", e);
                AggregatorOutcome::default()
            }
        };

        log::info!("[Server] stopping signal controller");
        self.controller_stop.cancel();
        let final_signal = match self.controller.await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::error!("[Server] signal controller task failed: {}", e);
                None
            }
        };

        RunReport::new(outcome, final_signal)
    }
}

/// Runs until Ctrl-C, or until `run_for` units have passed when configured.
pub async fn run_until_stopped(server: CentralServer) -> RunReport {
    let run_for = server.config().run_for.map(|units| server.config().units(units));
    let system = server.start();
    let stop = system.stop_token();

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => log::info!("[Server] interrupt received, shutting down"),
            Err(e) => log::error!("[Server] cannot listen for Ctrl-C ({}), shutting down", e),
        },
        _ = async {
            match run_for {
                Some(duration) => sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        } => log::info!("[Server] run time elapsed, shutting down"),
        _ = stop.cancelled() => log::info!("[Server] stop requested"),
    }

    system.shutdown().await
}
