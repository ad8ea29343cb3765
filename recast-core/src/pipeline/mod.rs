//! End-to-end orchestration of a single re-upload pass.

mod report;
mod runner;

pub use report::{PreviewReport, RunReport, TargetFailure};
pub use runner::{Pipeline, PipelineBuilder, PipelineError, PipelineResult, TargetBinding};
