// central_server_main.rs
use intersection_control::config::SystemConfig;
use intersection_control::engine::{run_until_stopped, CentralServer};
use intersection_control::monitoring::{plot_history, write_history_csv};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Optional first argument: path to a JSON config file.
    let config = match std::env::args().nth(1) {
        Some(path) => SystemConfig::from_file(path)?,
        None => SystemConfig::default(),
    };
    let report_paths = config.report.clone();

    println!("Starting central server for {}...", config.intersection);
    let server = CentralServer::new(config)?;
    let report = run_until_stopped(server).await;

    report.print_summary();
    if let Some(path) = &report_paths.history_csv {
        match write_history_csv(path, report.history.entries()) {
            Ok(rows) => println!("History ({} rows) saved to {}", rows, path.display()),
            Err(e) => eprintln!("Error writing history: {}", e),
        }
    }
    if let Some(path) = &report_paths.plot_png {
        match plot_history(path, report.history.entries()) {
            Ok(()) => println!("Traffic volume chart saved to {}", path.display()),
            Err(e) => eprintln!("Error plotting history: {}", e),
        }
    }
    Ok(())
}
