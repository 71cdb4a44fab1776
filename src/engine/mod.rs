pub mod system;

pub use system::{run_until_stopped, CentralServer, RunningSystem};
