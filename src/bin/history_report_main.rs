// history_report_main.rs
use intersection_control::global_variables::{HISTORY_CSV, HISTORY_PLOT};
use intersection_control::monitoring::{plot_history, read_history_csv};
use intersection_control::shared_data::Direction;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let input = args.next().unwrap_or_else(|| HISTORY_CSV.to_string());
    let output = args.next().unwrap_or_else(|| HISTORY_PLOT.to_string());

    let entries = read_history_csv(&input)?;
    println!("Traffic History ({} entries from {}):", entries.len(), input);
    for entry in &entries {
        let counts: Vec<String> = entry
            .counts
            .iter()
            .map(|(d, c)| format!("{}={}", d, c))
            .collect();
        println!("{} {} {}", entry.timestamp_ms, entry.location, counts.join(" "));
    }
    for direction in Direction::ALL {
        let peak = entries.iter().map(|e| e.counts.get(direction)).max().unwrap_or(0);
        println!("Peak {}: {}", direction, peak);
    }

    plot_history(&output, &entries)?;
    println!("Traffic volume chart saved to {}", output);
    Ok(())
}
