//! Text2SqlService
//!
//! Entry points callers use: the staged pipeline, and a single-shot path
//! that goes straight from question to SQL with one model call.

use crate::advisor::BusinessRuleAdvisor;
use crate::backend::Row;
use crate::config::AppConfig;
use crate::error::{Text2SqlError, Result};
use crate::llm::{CompletionClient, LlmClient};
use crate::pipeline::{PipelineOrchestrator, PipelineResult};
use crate::prompts::{self, vars, PromptLibrary};
use crate::router::BackendRouter;
use crate::sql::{self, SafetyGate};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Result of the single-shot path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Absent on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn success(sql: String, rows: Vec<Row>) -> Self {
        Self {
            success: true,
            sql: Some(sql),
            rows: Some(rows),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            sql: None,
            rows: None,
            error: Some(message.into()),
        }
    }
}

pub struct Text2SqlService {
    client: Arc<dyn CompletionClient>,
    prompts: Arc<PromptLibrary>,
    router: Arc<BackendRouter>,
    orchestrator: PipelineOrchestrator,
}

impl Text2SqlService {
    pub fn new(client: Arc<dyn CompletionClient>, prompts: Arc<PromptLibrary>, router: Arc<BackendRouter>) -> Self {
        let orchestrator = PipelineOrchestrator::new(client.clone(), prompts.clone(), router.clone());
        Self {
            client,
            prompts,
            router,
            orchestrator,
        }
    }

    /// Wires the OpenAI-compatible client, prompt library and backends
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client: Arc<dyn CompletionClient> = Arc::new(LlmClient::from_config(&config.llm)?);
        let prompts = match &config.prompts_dir {
            Some(dir) => PromptLibrary::load_dir(dir)?,
            None => PromptLibrary::builtin(),
        };
        let router = BackendRouter::from_config(config)?;

        let service = Self::new(client, Arc::new(prompts), Arc::new(router)).with_orchestrator(|o| {
            o.with_advisor(BusinessRuleAdvisor::new(config.join_hints.clone()))
                .with_gate(SafetyGate::with_strict(config.strict_sql))
                .with_summary(config.summarize_results)
        });
        info!(
            "Service ready: {} datasources, default '{}'",
            service.router.names().len(),
            service.router.default_name()
        );
        Ok(service)
    }

    /// Reconfigures the staged pipeline
    pub fn with_orchestrator<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(PipelineOrchestrator) -> PipelineOrchestrator,
    {
        self.orchestrator = configure(self.orchestrator);
        self
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    /// Staged run; see [`PipelineOrchestrator::run`]
    pub async fn process_with_steps(&self, user_query: &str) -> PipelineResult {
        self.orchestrator.run(user_query).await
    }

    pub async fn process_with_steps_hint(&self, user_query: &str, tables_hint: Option<&str>) -> PipelineResult {
        self.orchestrator.run_with_hint(user_query, tables_hint).await
    }

    /// Single-shot: one model call, then the same extract/gate/execute path
    /// as stage 5. Failures come back inside the outcome.
    pub async fn process(&self, user_query: &str, tables_hint: Option<&str>) -> QueryOutcome {
        let span = info_span!("process", request_id = %Uuid::new_v4());
        async {
            match self.try_process(user_query, tables_hint).await {
                Ok((sql, rows)) => {
                    info!("Query complete, {} rows", rows.len());
                    QueryOutcome::success(sql, rows)
                }
                Err(e) => {
                    error!("Query failed: {}", e);
                    QueryOutcome::error(e.to_string())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_process(&self, user_query: &str, tables_hint: Option<&str>) -> Result<(String, Vec<Row>)> {
        let user_query = user_query.trim();
        if user_query.is_empty() {
            return Err(Text2SqlError::Validation("user query must not be blank".to_string()));
        }

        let prompt = match tables_hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => {
                info!("Generating SQL for: {} (tables: {})", user_query, hint);
                self.prompts
                    .get(prompts::SQL_GENERATION_WITH_TABLES)?
                    .render(&vars([("userQuery", user_query), ("tableNames", hint)]))?
            }
            None => {
                info!("Generating SQL for: {}", user_query);
                self.prompts
                    .get(prompts::SQL_GENERATION)?
                    .render(&vars([("userQuery", user_query)]))?
            }
        };

        let reply = self
            .client
            .complete(&prompt)
            .await
            .map_err(|e| Text2SqlError::Generation(e.to_string()))?;

        let sql = sql::extract(&reply)
            .ok_or_else(|| Text2SqlError::Extraction("no SQL statement in model output".to_string()))?;
        self.orchestrator.gate().check(&sql).into_result()?;

        let backend = self.router.current();
        info!("Executing on '{}': {}", backend.name(), sql);
        let rows = backend
            .query(&sql)
            .await
            .map_err(|e| Text2SqlError::Execution(e.to_string()))?;
        Ok((sql, rows))
    }

    /// Tables of the backend the active execution context selects
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.router.current().list_tables().await
    }

    pub async fn health_check(&self) -> Vec<(String, bool)> {
        self.router.health_check_all().await
    }
}
