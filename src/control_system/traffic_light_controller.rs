use crate::config::{to_duration, SystemConfig, TimingConfig};
use crate::shared_data::{Direction, DirectionalCounts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// The possible states for the traffic light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    Green,
    Yellow,
    Red,
}

impl SignalState {
    pub fn next(self) -> SignalState {
        match self {
            SignalState::Green => SignalState::Yellow,
            SignalState::Yellow => SignalState::Red,
            SignalState::Red => SignalState::Green,
        }
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalState::Green => "Green",
            SignalState::Yellow => "Yellow",
            SignalState::Red => "Red",
        };
        f.write_str(name)
    }
}

/// Green time per direction, in time units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenTimeAllocation {
    times: BTreeMap<Direction, f64>,
}

impl GreenTimeAllocation {
    pub fn get(&self, direction: Direction) -> f64 {
        self.times.get(&direction).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, f64)> + '_ {
        self.times.iter().map(|(&d, &t)| (d, t))
    }

    /// The busiest direction's allocation.
    pub fn max(&self) -> f64 {
        self.times.values().copied().fold(0.0, f64::max)
    }
}

impl fmt::Display for GreenTimeAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(d, t)| format!("{}: {:.1}", d, t))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Splits green time in proportion to each direction's share of the total volume.
///
/// Returns `None` when there is no traffic at all.
pub fn compute_green_times(
    counts: &DirectionalCounts,
    min_green: f64,
    max_green: f64,
) -> Option<GreenTimeAllocation> {
    let total = counts.total();
    if total == 0 {
        return None;
    }
    let times = counts
        .iter()
        .map(|(direction, count)| {
            let ratio = count as f64 / total as f64;
            let green = min_green + (max_green - min_green) * ratio;
            (direction, green.clamp(min_green, max_green))
        })
        .collect();
    Some(GreenTimeAllocation { times })
}

/// Point-in-time view of a controller, safe to hand out across tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalSnapshot {
    pub intersection: String,
    pub state: SignalState,
    pub green_duration: f64,
    pub yellow_duration: f64,
    pub red_duration: f64,
    pub allocation: Option<GreenTimeAllocation>,
    pub overriding: bool,
    pub cycles_completed: u64,
}

/// Signal state machine for one intersection. Holds no timers: the owner calls
/// `advance` whenever `phase_duration` has elapsed.
#[derive(Debug, Clone)]
pub struct IntersectionSignal {
    intersection: String,
    state: SignalState,
    green_duration: f64,
    yellow_duration: f64,
    red_duration: f64,
    min_green: f64,
    max_green: f64,
    allocation: Option<GreenTimeAllocation>,
    // Length of the active override, if one is running.
    override_duration: Option<f64>,
    cycles_completed: u64,
}

impl IntersectionSignal {
    pub fn new(intersection: impl Into<String>, timing: &TimingConfig) -> Self {
        Self {
            intersection: intersection.into(),
            state: SignalState::Green,
            green_duration: timing.green,
            yellow_duration: timing.yellow,
            red_duration: timing.red,
            min_green: timing.min_green,
            max_green: timing.max_green,
            allocation: None,
            override_duration: None,
            cycles_completed: 0,
        }
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    pub fn green_duration(&self) -> f64 {
        self.green_duration
    }

    pub fn allocation(&self) -> Option<&GreenTimeAllocation> {
        self.allocation.as_ref()
    }

    pub fn is_overriding(&self) -> bool {
        self.override_duration.is_some()
    }

    /// Recomputes the green-time allocation and the next green phase length.
    ///
    /// Zero total traffic leaves everything as it was. Returns whether timing changed.
    pub fn adjust_timing(&mut self, counts: &DirectionalCounts) -> bool {
        let Some(allocation) = compute_green_times(counts, self.min_green, self.max_green) else {
            log::info!("[Controller] {}: no traffic, keeping current timing", self.intersection);
            return false;
        };
        let next_green = allocation.max();
        log::info!(
            "[Controller] New green light durations for {}: {}",
            self.intersection, allocation
        );
        if (next_green - self.green_duration).abs() > f64::EPSILON {
            log::debug!(
                "[Controller] {}: green phase {:.1} -> {:.1} units",
                self.intersection, self.green_duration, next_green
            );
        }
        self.green_duration = next_green;
        self.allocation = Some(allocation);
        true
    }

    /// Forces Green for `duration` units, discarding whatever phase was running.
    pub fn begin_override(&mut self, duration: f64) {
        log::warn!(
            "[Controller] Override: setting {} to Green for {:.1} units (was {})",
            self.intersection, duration, self.state
        );
        self.state = SignalState::Green;
        self.override_duration = Some(duration);
    }

    /// Length of the phase that is currently counting down.
    pub fn phase_duration(&self) -> f64 {
        if let Some(duration) = self.override_duration {
            return duration;
        }
        match self.state {
            SignalState::Green => self.green_duration,
            SignalState::Yellow => self.yellow_duration,
            SignalState::Red => self.red_duration,
        }
    }

    /// Moves on once the current phase has run out.
    ///
    /// An expired override hands over to a fresh regular Green phase.
    pub fn advance(&mut self) -> SignalState {
        if self.override_duration.take().is_some() {
            log::info!(
                "[Controller] Override complete at {}. Resuming normal cycle from Green",
                self.intersection
            );
            self.state = SignalState::Green;
            return self.state;
        }
        self.state = self.state.next();
        if self.state == SignalState::Green {
            self.cycles_completed += 1;
        }
        log::info!("[Controller] {}: {}", self.intersection, self.state);
        self.state
    }

    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot {
            intersection: self.intersection.clone(),
            state: self.state,
            green_duration: self.green_duration,
            yellow_duration: self.yellow_duration,
            red_duration: self.red_duration,
            allocation: self.allocation.clone(),
            overriding: self.is_overriding(),
            cycles_completed: self.cycles_completed,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ControllerError {
    #[error("signal controller has stopped")]
    Stopped,

    #[error("override duration must be a positive number of time units, got {0}")]
    InvalidOverride(f64),
}

#[derive(Debug)]
enum ControllerCommand {
    AdjustTiming(DirectionalCounts),
    Override(f64),
    Snapshot(oneshot::Sender<SignalSnapshot>),
}

/// Cloneable handle used to talk to a running controller task.
#[derive(Debug, Clone)]
pub struct SignalControllerHandle {
    tx: mpsc::UnboundedSender<ControllerCommand>,
}

impl SignalControllerHandle {
    /// Queues a timing recomputation. Applies to the next Green phase.
    pub fn adjust_timing(&self, counts: DirectionalCounts) -> Result<(), ControllerError> {
        self.tx
            .send(ControllerCommand::AdjustTiming(counts))
            .map_err(|_| ControllerError::Stopped)
    }

    pub fn override_signal(&self, duration: f64) -> Result<(), ControllerError> {
        if !(duration.is_finite() && duration > 0.0) {
            return Err(ControllerError::InvalidOverride(duration));
        }
        self.tx
            .send(ControllerCommand::Override(duration))
            .map_err(|_| ControllerError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<SignalSnapshot, ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControllerCommand::Snapshot(reply_tx))
            .map_err(|_| ControllerError::Stopped)?;
        reply_rx.await.map_err(|_| ControllerError::Stopped)
    }
}

/// Owns the intersection signal and serializes every read and write to it.
///
/// The phase timer is a deadline raced against incoming commands and the
/// shutdown token, so an override or a stop request never waits out a phase.
pub struct SignalController {
    signal: IntersectionSignal,
    commands: mpsc::UnboundedReceiver<ControllerCommand>,
    time_unit: Duration,
    shutdown: CancellationToken,
}

impl SignalController {
    pub fn new(config: &SystemConfig, shutdown: CancellationToken) -> (Self, SignalControllerHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let controller = Self {
            signal: IntersectionSignal::new(config.intersection.clone(), &config.timing),
            commands,
            time_unit: config.time_unit(),
            shutdown,
        };
        (controller, SignalControllerHandle { tx })
    }

    pub fn spawn(
        config: &SystemConfig,
        shutdown: CancellationToken,
    ) -> (SignalControllerHandle, JoinHandle<SignalSnapshot>) {
        let (controller, handle) = Self::new(config, shutdown);
        (handle, tokio::spawn(controller.run()))
    }

    fn phase_time(&self) -> Duration {
        to_duration(self.time_unit, self.signal.phase_duration())
    }

    /// Runs the cycle until shutdown and returns the final state.
    pub async fn run(mut self) -> SignalSnapshot {
        log::info!(
            "[Controller] {}: starting in {} for {:.1} units",
            self.signal.intersection,
            self.signal.state(),
            self.signal.phase_duration()
        );
        let mut deadline = Instant::now() + self.phase_time();
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv(), if commands_open => match command {
                    Some(ControllerCommand::AdjustTiming(counts)) => {
                        self.signal.adjust_timing(&counts);
                    }
                    Some(ControllerCommand::Override(duration)) => {
                        self.signal.begin_override(duration);
                        deadline = Instant::now() + self.phase_time();
                    }
                    Some(ControllerCommand::Snapshot(reply)) => {
                        // The caller may have given up waiting.
                        let _ = reply.send(self.signal.snapshot());
                    }
                    None => {
                        log::debug!("[Controller] all handles dropped, cycling on timer only");
                        commands_open = false;
                    }
                },
                _ = sleep_until(deadline) => {
                    self.signal.advance();
                    deadline += self.phase_time();
                }
            }
        }

        log::info!(
            "[Controller] {}: stopped in {} after {} cycles",
            self.signal.intersection,
            self.signal.state(),
            self.signal.cycles_completed
        );
        self.signal.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn signal() -> IntersectionSignal {
        IntersectionSignal::new("Intersection A", &TimingConfig::default())
    }

    #[test]
    fn equal_volumes_get_equal_green_time() {
        let allocation =
            compute_green_times(&DirectionalCounts::new(10, 10, 10, 10), 10.0, 60.0).unwrap();
        for direction in Direction::ALL {
            assert_eq!(allocation.get(direction), 22.5);
        }
    }

    #[test]
    fn single_busy_direction_saturates() {
        let allocation =
            compute_green_times(&DirectionalCounts::new(50, 0, 0, 0), 10.0, 60.0).unwrap();
        assert_eq!(allocation.get(Direction::Northbound), 60.0);
        assert_eq!(allocation.get(Direction::Southbound), 10.0);
        assert_eq!(allocation.get(Direction::Eastbound), 10.0);
        assert_eq!(allocation.get(Direction::Westbound), 10.0);
    }

    #[test]
    fn allocations_stay_in_bounds_and_follow_volume() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let counts = DirectionalCounts::new(
                rng.random_range(0..200),
                rng.random_range(0..200),
                rng.random_range(0..200),
                rng.random_range(0..200),
            );
            let Some(allocation) = compute_green_times(&counts, 10.0, 60.0) else {
                assert_eq!(counts.total(), 0);
                continue;
            };
            for (direction, green) in allocation.iter() {
                assert!((10.0..=60.0).contains(&green), "{} got {}", direction, green);
            }
            for (a, count_a) in counts.iter() {
                for (b, count_b) in counts.iter() {
                    if count_a > count_b {
                        assert!(allocation.get(a) >= allocation.get(b));
                    }
                }
            }
        }
    }

    #[test]
    fn zero_traffic_leaves_timing_untouched() {
        let mut signal = signal();
        signal.adjust_timing(&DirectionalCounts::new(30, 10, 0, 0));
        let before = signal.snapshot();

        assert!(!signal.adjust_timing(&DirectionalCounts::default()));
        assert_eq!(signal.snapshot(), before);
    }

    #[test]
    fn busiest_direction_sets_the_next_green_phase() {
        let mut signal = signal();
        assert!(signal.adjust_timing(&DirectionalCounts::new(30, 10, 0, 0)));
        // 10 + 50 * 0.75
        assert_eq!(signal.green_duration(), 47.5);
        assert_eq!(signal.phase_duration(), 47.5);
    }

    #[test]
    fn cycle_runs_green_yellow_red() {
        let mut signal = signal();
        assert_eq!(signal.state(), SignalState::Green);
        assert_eq!(signal.advance(), SignalState::Yellow);
        assert_eq!(signal.phase_duration(), 5.0);
        assert_eq!(signal.advance(), SignalState::Red);
        assert_eq!(signal.advance(), SignalState::Green);
        assert_eq!(signal.snapshot().cycles_completed, 1);
    }

    #[test]
    fn expired_override_restarts_from_green() {
        let mut signal = signal();
        signal.advance();
        assert_eq!(signal.state(), SignalState::Yellow);

        signal.begin_override(15.0);
        assert_eq!(signal.state(), SignalState::Green);
        assert_eq!(signal.phase_duration(), 15.0);

        assert_eq!(signal.advance(), SignalState::Green);
        assert!(!signal.is_overriding());
        assert_eq!(signal.phase_duration(), 30.0);
        assert_eq!(signal.advance(), SignalState::Yellow);
    }

    #[tokio::test]
    async fn invalid_override_durations_are_rejected() {
        let config = SystemConfig::default();
        let (_controller, handle) = SignalController::new(&config, CancellationToken::new());
        assert_eq!(
            handle.override_signal(0.0),
            Err(ControllerError::InvalidOverride(0.0))
        );
        assert!(handle.override_signal(f64::NAN).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drives_the_cycle() {
        let shutdown = CancellationToken::new();
        let (handle, task) = SignalController::spawn(&SystemConfig::default(), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(handle.snapshot().await.unwrap().state, SignalState::Yellow);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.snapshot().await.unwrap().state, SignalState::Red);
        tokio::time::sleep(Duration::from_secs(30)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SignalState::Green);
        assert_eq!(snapshot.cycles_completed, 1);

        shutdown.cancel();
        assert_eq!(task.await.unwrap().state, SignalState::Green);
    }

    #[tokio::test(start_paused = true)]
    async fn override_during_yellow_forces_green_then_resumes_from_green() {
        let shutdown = CancellationToken::new();
        let (handle, task) = SignalController::spawn(&SystemConfig::default(), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(handle.snapshot().await.unwrap().state, SignalState::Yellow);

        handle.override_signal(15.0).unwrap();
        let during = handle.snapshot().await.unwrap();
        assert_eq!(during.state, SignalState::Green);
        assert!(during.overriding);

        // Override ends at 46s; the regular Green phase that follows runs until 76s.
        tokio::time::sleep(Duration::from_secs(16)).await;
        let after = handle.snapshot().await.unwrap();
        assert_eq!(after.state, SignalState::Green);
        assert!(!after.overriding);

        tokio::time::sleep(Duration::from_secs(28)).await;
        assert_eq!(handle.snapshot().await.unwrap().state, SignalState::Green);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.snapshot().await.unwrap().state, SignalState::Yellow);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn adjusted_timing_applies_to_the_next_green_phase() {
        let shutdown = CancellationToken::new();
        let (handle, task) = SignalController::spawn(&SystemConfig::default(), shutdown.clone());

        handle.adjust_timing(DirectionalCounts::new(50, 0, 0, 0)).unwrap();
        // The running 30 unit Green phase is not stretched.
        tokio::time::sleep(Duration::from_secs(31)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SignalState::Yellow);
        assert_eq!(snapshot.green_duration, 60.0);

        // Yellow ends at 35s, Red at 65s, then Green holds for 60 units.
        tokio::time::sleep(Duration::from_secs(35 + 58)).await;
        assert_eq!(handle.snapshot().await.unwrap().state, SignalState::Green);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.snapshot().await.unwrap().state, SignalState::Yellow);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_long_phase() {
        let shutdown = CancellationToken::new();
        let (_handle, task) = SignalController::spawn(&SystemConfig::default(), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = Instant::now();
        shutdown.cancel();
        let snapshot = task.await.unwrap();

        assert_eq!(snapshot.state, SignalState::Green);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
