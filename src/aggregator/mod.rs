pub mod central_server;
pub mod history;

pub use central_server::{Aggregator, AggregatorError, AggregatorOutcome};
pub use history::{HistoryEntry, HistoryLog, SensorSummary};
