//! Grading job pipeline: intake, extraction, image build, sandboxed run and
//! result ingestion, with progress streamed to a client session.

pub mod channel;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod intake;

pub use channel::{Publisher, SessionHub};
pub use engine::{CommandSpec, ProcessRunner, SystemRunner};
pub use executor::{JobOutcome, Orchestrator, PipelineError, SubmitError};
