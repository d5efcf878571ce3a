//! Staged generation-and-execution pipeline

pub mod orchestrator;
pub mod result;
pub mod stage;

pub use orchestrator::{is_rejection, PipelineOrchestrator};
pub use result::{FailureKind, PipelineFailure, PipelineResult, StepResult};
pub use stage::StageExecutor;
