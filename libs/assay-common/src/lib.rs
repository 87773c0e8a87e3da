pub mod types;
pub mod layout;
pub mod config;

// Re-export commonly used types for convenience
pub use types::{GradeResult, Job, JobEvent, JobStage, Section};
pub use config::Config;
pub use layout::DataLayout;
