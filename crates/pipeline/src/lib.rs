//! Job pipeline.
//!
//! - [`orchestrator`] - validates a request, assigns identifiers and
//!   detaches the background task.
//! - [`runner`] - one job's background unit of work: connect, upload,
//!   submit, monitor, materialize, report.
//! - [`outputs`] - turns a completed prompt's history into artifacts.

pub mod orchestrator;
pub mod outputs;
pub mod runner;

pub use orchestrator::{Acceptance, JobOrchestrator};
pub use outputs::OutputMaterializer;
pub use runner::{JobError, JobRunner};
