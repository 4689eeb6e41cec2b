// Process module - supervised process lifecycle

pub mod control;
pub mod health;
pub mod launcher;
pub mod output;
pub mod registry;
pub mod restart;
pub mod supervisor;
pub mod types;

pub use control::{ControlSurface, StartOutcome, StartReport, StopOutcome};
pub use health::{HealthMonitor, HealthStatus, MarkerProbe, Readiness, ReadinessProbe, ReadyOutcome};
pub use launcher::{ProcessLauncher, TerminateOutcome};
pub use output::{OutputBuffer, OutputLine, StreamKind};
pub use registry::ProcessRegistry;
pub use restart::{BackoffStrategy, RestartPolicy, RestartTracker};
pub use supervisor::Supervisor;
pub use types::{ExitInfo, ProcessId, ProcessRecord, ProcessStatus, StatusSnapshot};
