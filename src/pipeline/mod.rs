// Scan pipeline: one time-budgeted invocation plus its housekeeping.

pub mod budget;
pub mod discovery;
pub mod job;
pub mod orchestrator;
pub mod reconcile;

pub use budget::{Phase, TimeBudget};
pub use job::{ScanStatus, ScanTrigger, TriggerError};
pub use orchestrator::{RunSummary, ScanOrchestrator};
