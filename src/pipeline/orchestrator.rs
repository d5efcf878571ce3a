//! Five-stage pipeline
//!
//! Stages 1-4 are model calls described by [`StageSpec`] rows and driven by a
//! single loop. Stage 5 is local: extract one statement from the stage-4
//! output, put it through the safety gate, then run it on the backend the
//! active execution context selects.
//!
//! Stage 5 does not go through [`StageExecutor`]; only the optional result
//! narration does, and its failure never fails the stage.

use super::result::{FailureKind, PipelineResult, StepResult};
use super::stage::{trim_output, PostProcess, StageExecutor};
use crate::advisor::BusinessRuleAdvisor;
use crate::backend::Row;
use crate::llm::CompletionClient;
use crate::prompts::{self, vars, PromptLibrary, Variables};
use crate::router::BackendRouter;
use crate::sql::{self, SafetyGate};
use chrono::{Local, NaiveDate};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Stage-1 replies that mean the question is out of scope
pub const REJECTION_MARKERS: &[&str] = &["not a database-related question", "no relevant business tables"];

pub const REJECTION_REASON: &str = "non-database query";
pub const EXTRACTION_FAILED: &str = "SQL extraction failed";

/// Rows handed to the narration prompt
const SUMMARY_ROW_LIMIT: usize = 50;

/// Whether a stage-1 reply rejects the question
pub fn is_rejection(content: &str) -> bool {
    let normalized = content.trim().to_lowercase();
    normalized.is_empty() || REJECTION_MARKERS.iter().any(|m| normalized.contains(m))
}

/// Inputs and stage outputs of one run
struct RunState<'a> {
    user_query: &'a str,
    tables_hint: Option<&'a str>,
    today: NaiveDate,
    outputs: Vec<String>,
}

impl RunState<'_> {
    /// Content of an earlier, successful stage
    fn output(&self, stage: usize) -> &str {
        self.outputs.get(stage - 1).map(String::as_str).unwrap_or_default()
    }
}

struct StageSpec {
    stage: usize,
    template: fn(&RunState) -> &'static str,
    variables: fn(&PipelineOrchestrator, &RunState) -> Variables,
    post_process: Option<PostProcess>,
    /// Classifies successful output as a rejection of the whole question
    rejects: Option<fn(&str) -> bool>,
}

const MODEL_STAGES: [StageSpec; 4] = [
    StageSpec {
        stage: 1,
        template: |_| prompts::STEP1_QUERY_REWRITE,
        variables: |_, s| vars([("userQuery", s.user_query)]),
        post_process: Some(trim_output),
        rejects: Some(is_rejection),
    },
    StageSpec {
        stage: 2,
        template: |s| match s.tables_hint {
            Some(_) => prompts::STEP2_TABLE_SELECTION_WITH_TABLES,
            None => prompts::STEP2_TABLE_SELECTION,
        },
        variables: |_, s| {
            let mut v = vars([("rewrittenQuery", s.output(1))]);
            if let Some(hint) = s.tables_hint {
                v.insert("tableNames".to_string(), hint.to_string());
            }
            v
        },
        post_process: Some(trim_output),
        rejects: None,
    },
    StageSpec {
        stage: 3,
        template: |_| prompts::STEP3_INFORMATION_INFERENCE,
        variables: |orch, s| {
            let rules = orch.advisor.build(s.output(1), s.output(2), s.today).annotation();
            info!("Business rules: {}", rules);
            vars([
                ("rewrittenQuery", s.output(1)),
                ("selectedTables", s.output(2)),
                ("businessRules", rules.as_str()),
            ])
        },
        post_process: Some(trim_output),
        rejects: None,
    },
    StageSpec {
        stage: 4,
        template: |_| prompts::STEP4_SQL_GENERATION,
        variables: |_, s| {
            vars([
                ("rewrittenQuery", s.output(1)),
                ("selectedTables", s.output(2)),
                ("inferenceResult", s.output(3)),
            ])
        },
        post_process: None,
        rejects: None,
    },
];

pub struct PipelineOrchestrator {
    stages: StageExecutor,
    advisor: BusinessRuleAdvisor,
    gate: SafetyGate,
    router: Arc<BackendRouter>,
    summarize: bool,
    today: Option<NaiveDate>,
}

impl PipelineOrchestrator {
    pub fn new(client: Arc<dyn CompletionClient>, prompts: Arc<PromptLibrary>, router: Arc<BackendRouter>) -> Self {
        Self {
            stages: StageExecutor::new(client, prompts),
            advisor: BusinessRuleAdvisor::default(),
            gate: SafetyGate::default(),
            router,
            summarize: false,
            today: None,
        }
    }

    pub fn with_advisor(mut self, advisor: BusinessRuleAdvisor) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_gate(mut self, gate: SafetyGate) -> Self {
        self.gate = gate;
        self
    }

    /// Ask the model to narrate stage-5 rows
    pub fn with_summary(mut self, summarize: bool) -> Self {
        self.summarize = summarize;
        self
    }

    /// Pin the date relative time phrases resolve against
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    pub async fn run(&self, user_query: &str) -> PipelineResult {
        self.run_with_hint(user_query, None).await
    }

    /// Like [`run`](Self::run), with candidate table names offered to stage 2
    pub async fn run_with_hint(&self, user_query: &str, tables_hint: Option<&str>) -> PipelineResult {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline", run_id = %run_id);
        self.run_stages(run_id, user_query, tables_hint).instrument(span).await
    }

    async fn run_stages(&self, run_id: String, user_query: &str, tables_hint: Option<&str>) -> PipelineResult {
        let mut result = PipelineResult::new(run_id);

        let user_query = user_query.trim();
        if user_query.is_empty() {
            warn!("Rejecting blank query");
            result.fail(1, FailureKind::Validation, "user query must not be blank");
            return result;
        }
        info!("Starting pipeline for: {}", user_query);

        let mut state = RunState {
            user_query,
            tables_hint: tables_hint.map(str::trim).filter(|h| !h.is_empty()),
            today: self.today.unwrap_or_else(|| Local::now().date_naive()),
            outputs: Vec::with_capacity(4),
        };

        for spec in &MODEL_STAGES {
            let template = (spec.template)(&state);
            let variables = (spec.variables)(self, &state);
            let step = self.stages.execute(spec.stage, template, &variables, spec.post_process).await;

            let content = match step.content() {
                Some(content) if step.is_ok() => content.to_string(),
                _ => {
                    let reason = step.error().unwrap_or("stage failed").to_string();
                    result.fail(spec.stage, FailureKind::Generation, reason);
                    return result;
                }
            };

            if let Some(rejects) = spec.rejects {
                if rejects(&content) {
                    info!("Stage {} rejected the question: {}", spec.stage, content);
                    result.record(spec.stage, step);
                    result.fail(spec.stage, FailureKind::ClassificationRejection, REJECTION_REASON);
                    return result;
                }
            }

            if content.trim().is_empty() {
                result.fail(
                    spec.stage,
                    FailureKind::Generation,
                    format!("stage {} returned no content", spec.stage),
                );
                return result;
            }

            info!("Stage {} complete", spec.stage);
            result.record(spec.stage, step);
            state.outputs.push(content);
        }

        self.execute_sql_stage(&state, &mut result).await;
        result
    }

    async fn execute_sql_stage(&self, state: &RunState<'_>, result: &mut PipelineResult) {
        let Some(sql) = sql::extract(state.output(4)) else {
            result.fail(5, FailureKind::Extraction, EXTRACTION_FAILED);
            return;
        };

        let verdict = self.gate.check(&sql);
        if !verdict.allowed {
            let reason = verdict.reason.unwrap_or_else(|| "statement rejected".to_string());
            result.fail(5, FailureKind::SafetyViolation, format!("SQL safety violation: {}", reason));
            return;
        }

        let backend = self.router.current();
        info!("Executing on '{}': {}", backend.name(), sql);
        result.set_executed_sql(&sql);

        let rows = match backend.query(&sql).await {
            Ok(rows) => rows,
            Err(e) => {
                result.fail(5, FailureKind::Execution, e.to_string());
                return;
            }
        };
        info!("Stage 5 returned {} rows", rows.len());

        let mut payload = json!({
            "sql": sql,
            "dataSource": backend.name(),
            "rowCount": rows.len(),
            "rows": rows,
        });
        if self.summarize {
            if let Some(summary) = self.summarize_rows(&sql, &rows).await {
                payload["summary"] = json!(summary);
            }
        }

        result.record(5, StepResult::success(payload.to_string()));
    }

    /// Narration of executed rows; a failed narration leaves the rows intact
    async fn summarize_rows(&self, sql: &str, rows: &[Row]) -> Option<String> {
        let sample = &rows[..rows.len().min(SUMMARY_ROW_LIMIT)];
        let query_result = json!(sample).to_string();
        let variables = vars([("sqlQuery", sql), ("queryResult", query_result.as_str())]);

        let step = self
            .stages
            .execute(5, prompts::STEP5_SQL_EXECUTION, &variables, Some(trim_output))
            .await;
        match step.content() {
            Some(summary) if step.is_ok() && !summary.is_empty() => Some(summary.to_string()),
            _ => {
                warn!("Result narration unavailable: {}", step.error().unwrap_or("empty reply"));
                None
            }
        }
    }
}
