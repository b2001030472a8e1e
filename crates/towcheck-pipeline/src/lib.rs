//! Resumable verification loop: skip what the checkpoint already holds,
//! verify the rest one carrier at a time, and commit each outcome durably.

mod error;
pub use error::PipelineError;

pub mod pipeline;
pub mod policy;
pub mod progress;

pub use pipeline::{Pipeline, RunSummary};
pub use policy::{InconclusivePolicy, Pacing, PipelineConfig, RetryPolicy};
