use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use text2sql::pipeline::orchestrator::{EXTRACTION_FAILED, REJECTION_REASON};
use text2sql::{
    with_selector, BackendRouter, CompletionClient, FailureKind, PipelineOrchestrator, PromptLibrary, QueryBackend,
    Result, Row, SqliteBackend, Text2SqlError,
};

/// Replies in order and remembers every prompt it was given
struct ScriptedClient {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Text2SqlError::Llm("script exhausted".to_string()))
    }
}

/// Counts statements that reach the database
struct CountingBackend {
    inner: SqliteBackend,
    calls: AtomicUsize,
}

#[async_trait]
impl QueryBackend for CountingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}

fn distribution_db() -> Arc<CountingBackend> {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE employee (id INTEGER PRIMARY KEY, name TEXT, dept TEXT, salary REAL);
         INSERT INTO employee VALUES (1, 'Ada', 'sales', 5200.0);
         INSERT INTO employee VALUES (2, 'Brook', 'sales', 4100.0);
         INSERT INTO employee VALUES (3, 'Cy', 'ops', 3900.0);",
    )
    .unwrap();
    Arc::new(CountingBackend {
        inner: SqliteBackend::from_connection("ticket-distribution", conn, 1000),
        calls: AtomicUsize::new(0),
    })
}

fn booking_db() -> Arc<SqliteBackend> {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE bookings (id INTEGER PRIMARY KEY, passenger TEXT);
         INSERT INTO bookings VALUES (10, 'Dana');",
    )
    .unwrap();
    Arc::new(SqliteBackend::from_connection("ticket-booking", conn, 1000))
}

fn router(distribution: Arc<CountingBackend>) -> Arc<BackendRouter> {
    Arc::new(
        BackendRouter::builder("ticket-distribution")
            .register("ticket-distribution", &["distribution".to_string()], distribution)
            .register("ticket-booking", &["booking".to_string()], booking_db())
            .build()
            .unwrap(),
    )
}

fn orchestrator(client: Arc<ScriptedClient>, distribution: Arc<CountingBackend>) -> PipelineOrchestrator {
    PipelineOrchestrator::new(client, Arc::new(PromptLibrary::builtin()), router(distribution))
        .with_today(NaiveDate::from_ymd_opt(2024, 3, 13).unwrap())
}

const SALES_STAGES: [&str; 4] = [
    "List every employee of the sales department.",
    "employee",
    "- return all columns\n- filter dept = 'sales'",
    "```sql\nSELECT * FROM employee WHERE dept='sales'\n```",
];

#[tokio::test]
async fn test_sales_question_runs_all_five_stages() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let client = ScriptedClient::new(&SALES_STAGES);
    let db = distribution_db();
    let pipeline = orchestrator(client.clone(), db.clone());

    let result = pipeline.run("List all employees in the sales department").await;

    assert!(result.is_success(), "failure: {:?}", result.failure());
    assert_eq!(result.steps().len(), 5);
    assert_eq!(result.step(2).unwrap().content(), Some("employee"));
    assert_eq!(result.executed_sql(), Some("SELECT * FROM employee WHERE dept='sales'"));
    assert_eq!(db.calls.load(Ordering::SeqCst), 1);

    let stage5: Value = serde_json::from_str(result.final_content().unwrap())?;
    assert_eq!(stage5["sql"], "SELECT * FROM employee WHERE dept='sales'");
    assert_eq!(stage5["dataSource"], "ticket-distribution");
    assert_eq!(stage5["rowCount"], 2);
    assert_eq!(stage5["rows"][0]["name"], "Ada");
    assert!(stage5.get("summary").is_none());

    let prompts = client.prompts();
    assert_eq!(prompts.len(), 4);
    assert!(prompts[0].contains("User question: List all employees in the sales department"));
    assert!(prompts[1].contains("Request: List every employee of the sales department."));
    assert!(prompts[2].contains("Selected tables: employee"));
    assert!(prompts[2].contains("Reference business rules: generic analysis"));
    assert!(prompts[3].contains("filter dept = 'sales'"));
    Ok(())
}

#[tokio::test]
async fn test_blank_query_is_validation_error() {
    let client = ScriptedClient::new(&SALES_STAGES);
    let db = distribution_db();
    let result = orchestrator(client.clone(), db.clone()).run("   ").await;

    let failure = result.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.stage, 1);
    assert_eq!(result.steps().len(), 1);
    assert!(!result.step(1).unwrap().is_ok());
    assert!(client.prompts().is_empty());
    assert_eq!(db.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejection_marker_stops_after_stage_one() {
    for reply in ["not a database-related question", "No relevant business tables.", "   "] {
        let client = ScriptedClient::new(&[reply, "employee"]);
        let result = orchestrator(client.clone(), distribution_db()).run("What is the weather like?").await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::ClassificationRejection);
        assert_eq!(result.step(1).unwrap().error(), Some(REJECTION_REASON));
        for stage in 2..=5 {
            assert!(result.step(stage).is_none());
        }
        assert_eq!(client.prompts().len(), 1);
    }
}

#[tokio::test]
async fn test_mutating_statement_never_reaches_backend() {
    let client = ScriptedClient::new(&[SALES_STAGES[0], SALES_STAGES[1], SALES_STAGES[2], "DELETE FROM employee"]);
    let db = distribution_db();
    let result = orchestrator(client, db.clone()).run("Remove all employees").await;

    assert!(matches!(
        result.failure().unwrap().kind,
        FailureKind::Extraction | FailureKind::SafetyViolation
    ));
    assert!(result.step(4).unwrap().is_ok());
    assert!(!result.step(5).unwrap().is_ok());
    assert_eq!(result.executed_sql(), None);
    assert_eq!(db.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_smuggled_statement_is_safety_violation() {
    let client = ScriptedClient::new(&[
        SALES_STAGES[0],
        SALES_STAGES[1],
        SALES_STAGES[2],
        "SELECT * FROM employee; DROP TABLE employee",
    ]);
    let db = distribution_db();
    let result = orchestrator(client, db.clone()).run("List all employees").await;

    let failure = result.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::SafetyViolation);
    assert_eq!(failure.stage, 5);
    assert_eq!(
        result.step(5).unwrap().error(),
        Some("SQL safety violation: forbidden keyword DROP")
    );
    assert_eq!(db.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_prose_without_sql_is_extraction_failure() {
    let client = ScriptedClient::new(&[
        SALES_STAGES[0],
        SALES_STAGES[1],
        SALES_STAGES[2],
        "I am unable to write a query for that.",
    ]);
    let result = orchestrator(client.clone(), distribution_db()).run("List all employees").await;

    assert_eq!(result.failure().unwrap().kind, FailureKind::Extraction);
    assert_eq!(result.step(5).unwrap().error(), Some(EXTRACTION_FAILED));
    // stage 4 is not asked again
    assert_eq!(client.prompts().len(), 4);
}

#[tokio::test]
async fn test_completion_error_truncates_run() {
    let client = ScriptedClient::new(&[SALES_STAGES[0]]);
    let result = orchestrator(client, distribution_db()).run("List all employees").await;

    let failure = result.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Generation);
    assert_eq!(failure.stage, 2);
    assert!(result.step(2).unwrap().error().unwrap().contains("script exhausted"));
    assert!(result.step(3).is_none());
}

#[tokio::test]
async fn test_execution_error_is_reported_on_stage_five() {
    let client = ScriptedClient::new(&[
        SALES_STAGES[0],
        SALES_STAGES[1],
        SALES_STAGES[2],
        "SELECT * FROM payroll",
    ]);
    let db = distribution_db();
    let result = orchestrator(client, db.clone()).run("Show payroll").await;

    assert_eq!(result.failure().unwrap().kind, FailureKind::Execution);
    assert!(result.step(5).unwrap().error().unwrap().contains("payroll"));
    assert_eq!(db.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tables_hint_selects_alternate_template() {
    let client = ScriptedClient::new(&SALES_STAGES);
    let pipeline = orchestrator(client.clone(), distribution_db());

    let result = pipeline
        .run_with_hint("List all employees in the sales department", Some("employee, department"))
        .await;

    assert!(result.is_success());
    let prompts = client.prompts();
    assert!(prompts[1].contains("The user limited the search to these\ntables: employee, department"));
}

#[tokio::test]
async fn test_active_selector_picks_backend() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let client = ScriptedClient::new(&[
        "List every booking.",
        "bookings",
        "- return all columns",
        "SELECT passenger FROM bookings",
    ]);
    let db = distribution_db();
    let pipeline = orchestrator(client, db.clone());

    let result = with_selector(Some("Booking"), pipeline.run("Show all bookings")).await;

    let stage5: Value = serde_json::from_str(result.final_content().unwrap())?;
    assert_eq!(stage5["dataSource"], "ticket-booking");
    assert_eq!(stage5["rows"][0]["passenger"], "Dana");
    assert_eq!(db.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_summary_is_added_to_stage_five() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut script = SALES_STAGES.to_vec();
    script.push("Two employees work in sales: Ada and Brook.");
    let client = ScriptedClient::new(&script);
    let pipeline = orchestrator(client.clone(), distribution_db()).with_summary(true);

    let result = pipeline.run("List all employees in the sales department").await;

    let stage5: Value = serde_json::from_str(result.final_content().unwrap())?;
    assert_eq!(stage5["summary"], "Two employees work in sales: Ada and Brook.");
    assert_eq!(stage5["rowCount"], 2);

    let prompts = client.prompts();
    assert_eq!(prompts.len(), 5);
    assert!(prompts[4].contains("SQL: SELECT * FROM employee WHERE dept='sales'"));
    assert!(prompts[4].contains("\"Brook\""));
    Ok(())
}

#[tokio::test]
async fn test_failed_summary_keeps_rows() {
    let client = ScriptedClient::new(&SALES_STAGES);
    let pipeline = orchestrator(client, distribution_db()).with_summary(true);

    let result = pipeline.run("List all employees in the sales department").await;

    assert!(result.is_success());
    let stage5: Value = serde_json::from_str(result.final_content().unwrap()).unwrap();
    assert_eq!(stage5["rowCount"], 2);
    assert!(stage5.get("summary").is_none());
}

#[tokio::test]
async fn test_stage_five_runs_without_its_template() {
    let mut prompts = PromptLibrary::builtin();
    prompts.insert("step5-sql-execution", "Needs {unknownVariable}");
    let client = ScriptedClient::new(&SALES_STAGES);
    let db = distribution_db();
    let pipeline = PipelineOrchestrator::new(client.clone(), Arc::new(prompts), router(db.clone()));

    let result = pipeline.run("List all employees in the sales department").await;

    assert!(result.is_success(), "failure: {:?}", result.failure());
    assert_eq!(result.steps().len(), 5);
    assert_eq!(db.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.prompts().len(), 4);
}
