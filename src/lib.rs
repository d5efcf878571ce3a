pub mod advisor;
pub mod backend;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod router;
pub mod service;
pub mod sql;

pub use advisor::{BusinessRuleAdvisor, BusinessRuleSet};
pub use backend::{PostgresBackend, QueryBackend, Row, SqliteBackend};
pub use config::AppConfig;
pub use error::{Result, Text2SqlError};
pub use llm::{CompletionClient, LlmClient};
pub use pipeline::{FailureKind, PipelineOrchestrator, PipelineResult, StepResult};
pub use prompts::{PromptLibrary, PromptTemplate};
pub use router::{with_selector, BackendRouter};
pub use service::{QueryOutcome, Text2SqlService};
pub use sql::{SafetyGate, SafetyVerdict};
