use crate::aggregator::{AggregatorOutcome, HistoryEntry, HistoryLog, SensorSummary};
use crate::control_system::SignalSnapshot;
use crate::shared_data::{Direction, DirectionalCounts};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("plotting failed: {0}")]
    Plot(String),

    #[error("no history to report")]
    Empty,
}

fn plot_err<E: Display>(e: E) -> ReportError {
    ReportError::Plot(e.to_string())
}

/// Everything a run leaves behind, handed over after shutdown.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub history: HistoryLog,
    pub emergency_vehicle_count: u64,
    pub records_processed: u64,
    pub records_discarded: usize,
    pub sensors: BTreeMap<String, SensorSummary>,
    pub final_signal: Option<SignalSnapshot>,
}

impl RunReport {
    pub fn new(outcome: AggregatorOutcome, final_signal: Option<SignalSnapshot>) -> Self {
        Self {
            history: outcome.history,
            emergency_vehicle_count: outcome.emergency_vehicle_count,
            records_processed: outcome.records_processed,
            records_discarded: outcome.records_discarded,
            sensors: outcome.sensors,
            final_signal,
        }
    }

    pub fn print_summary(&self) {
        println!("Report Summary:");
        println!("Records processed: {}", self.records_processed);
        println!("Records discarded at shutdown: {}", self.records_discarded);
        println!("History entries: {}", self.history.len());
        println!("Emergency vehicles detected: {}", self.emergency_vehicle_count);
        for (direction, total) in self.history.totals() {
            println!("  {}: {} vehicles", direction, total);
        }
        for (location, summary) in &self.sensors {
            println!(
                "Sensor {}: {} readings ({} sequence gaps), last speed {:.0}, last air quality {:.2}",
                location,
                summary.readings,
                summary.sequence_gaps,
                summary.last_average_speed,
                summary.last_air_quality
            );
        }
        if let Some(signal) = &self.final_signal {
            println!(
                "Signal {}: {} after {} cycles, green phase {:.1} units",
                signal.intersection, signal.state, signal.cycles_completed, signal.green_duration
            );
            if let Some(allocation) = &signal.allocation {
                println!("Last green time allocation: {}", allocation);
            }
        }
    }
}

/// Flat CSV row for a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp_ms: u64,
    pub location: String,
    pub northbound: u32,
    pub southbound: u32,
    pub eastbound: u32,
    pub westbound: u32,
}

impl From<&HistoryEntry> for HistoryRecord {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            timestamp_ms: entry.timestamp_ms,
            location: entry.location.clone(),
            northbound: entry.counts.northbound,
            southbound: entry.counts.southbound,
            eastbound: entry.counts.eastbound,
            westbound: entry.counts.westbound,
        }
    }
}

impl From<HistoryRecord> for HistoryEntry {
    fn from(record: HistoryRecord) -> Self {
        Self {
            timestamp_ms: record.timestamp_ms,
            location: record.location,
            counts: DirectionalCounts::new(
                record.northbound,
                record.southbound,
                record.eastbound,
                record.westbound,
            ),
        }
    }
}

/// Writes the history to a CSV file, replacing any previous run. Returns rows written.
pub fn write_history_csv(path: impl AsRef<Path>, entries: &[HistoryEntry]) -> Result<usize, ReportError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for entry in entries {
        wtr.serialize(HistoryRecord::from(entry))?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(entries.len())
}

pub fn read_history_csv(path: impl AsRef<Path>) -> Result<Vec<HistoryEntry>, ReportError> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();
    for result in rdr.deserialize() {
        let record: HistoryRecord = result?;
        entries.push(record.into());
    }
    Ok(entries)
}

/// Draws per-direction volume over time as a PNG line chart.
pub fn plot_history(path: impl AsRef<Path>, entries: &[HistoryEntry]) -> Result<(), ReportError> {
    let first = entries.first().ok_or(ReportError::Empty)?;
    let start = first.timestamp_ms;
    let xs: Vec<f64> = entries
        .iter()
        .map(|e| e.timestamp_ms.saturating_sub(start) as f64 / 1000.0)
        .collect();
    let x_max = xs.iter().copied().fold(1.0, f64::max);
    let y_max = entries
        .iter()
        .flat_map(|e| e.counts.iter().map(|(_, count)| count))
        .max()
        .unwrap_or(0)
        .max(1);

    let root = BitMapBackend::new(path.as_ref(), (1000, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Traffic Volume Over Time", ("sans-serif", 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..x_max, 0u32..y_max + 1)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Traffic Volume")
        .draw()
        .map_err(plot_err)?;

    let colours = [RED, BLUE, GREEN, MAGENTA];
    for (direction, colour) in Direction::ALL.into_iter().zip(colours) {
        let points: Vec<(f64, u32)> = xs
            .iter()
            .zip(entries)
            .map(|(&x, e)| (x, e.counts.get(direction)))
            .collect();
        chart
            .draw_series(LineSeries::new(points.iter().copied(), colour.stroke_width(2)))
            .map_err(plot_err)?
            .label(direction.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour));
        chart
            .draw_series(points.iter().map(|&p| Circle::new(p, 3, colour.filled())))
            .map_err(plot_err)?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}
