// Daemon module - PID file, lifecycle and the supervising service

pub mod manager;
pub mod pid;
pub mod service;

pub use manager::{DaemonManager, DaemonStatus, DaemonStopOutcome};
pub use pid::PidFile;
pub use service::{handle_command, Daemon};
