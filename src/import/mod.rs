//! Import cycle orchestration.

pub mod lease;
pub mod orchestrator;
pub mod result;

pub use lease::{ImportLease, LeaseInfo};
pub use orchestrator::{ImportOrchestrator, ImportSettings};
pub use result::{Disposition, FileOutcome, ImportCycleResult};
