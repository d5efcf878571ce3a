use serde::Serialize;
use std::fmt;

/// Number of stages in a full run
pub const STAGE_COUNT: usize = 5;

/// Outcome of one stage. Exactly one of `content` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StepResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    ClassificationRejection,
    Generation,
    Extraction,
    SafetyViolation,
    Execution,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Validation => "ValidationError",
            FailureKind::ClassificationRejection => "ClassificationRejection",
            FailureKind::Generation => "GenerationFailure",
            FailureKind::Extraction => "ExtractionFailure",
            FailureKind::SafetyViolation => "SafetyViolation",
            FailureKind::Execution => "ExecutionError",
        };
        f.write_str(name)
    }
}

/// Where and why a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineFailure {
    pub kind: FailureKind,
    pub stage: usize,
    pub reason: String,
}

/// Stages in order. A stage past the first failure is absent rather than
/// error-valued: absent means never attempted.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: String,
    steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<PipelineFailure>,
    /// Statement that reached the backend, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    executed_sql: Option<String>,
}

impl PipelineResult {
    pub(crate) fn new(run_id: String) -> Self {
        Self {
            run_id,
            steps: Vec::with_capacity(STAGE_COUNT),
            failure: None,
            executed_sql: None,
        }
    }

    /// Records the next stage; `stage` must follow the last recorded one
    pub(crate) fn record(&mut self, stage: usize, step: StepResult) {
        debug_assert_eq!(stage, self.steps.len() + 1, "stages are recorded in order");
        debug_assert!(self.failure.is_none(), "no stage runs after a failure");
        self.steps.push(step);
    }

    /// Records `stage` as failed and closes the run
    pub(crate) fn fail(&mut self, stage: usize, kind: FailureKind, reason: impl Into<String>) {
        let reason = reason.into();
        let failed = StepResult::failure(reason.clone());
        if stage == self.steps.len() {
            // Replacing an already recorded stage, e.g. a rejected rewrite
            self.steps[stage - 1] = failed;
        } else {
            self.record(stage, failed);
        }
        self.failure = Some(PipelineFailure { kind, stage, reason });
    }

    pub(crate) fn set_executed_sql(&mut self, sql: &str) {
        self.executed_sql = Some(sql.to_string());
    }

    /// Stage `n` (1-based), or `None` when it never ran
    pub fn step(&self, n: usize) -> Option<&StepResult> {
        n.checked_sub(1).and_then(|idx| self.steps.get(idx))
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn failure(&self) -> Option<&PipelineFailure> {
        self.failure.as_ref()
    }

    pub fn executed_sql(&self) -> Option<&str> {
        self.executed_sql.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.steps.len() == STAGE_COUNT && self.steps.iter().all(StepResult::is_ok)
    }

    /// Stage-5 content of a successful run
    pub fn final_content(&self) -> Option<&str> {
        if self.is_success() {
            self.step(STAGE_COUNT).and_then(StepResult::content)
        } else {
            None
        }
    }
}
