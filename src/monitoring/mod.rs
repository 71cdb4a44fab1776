pub mod reporting;

pub use reporting::{plot_history, read_history_csv, write_history_csv, ReportError, RunReport};
