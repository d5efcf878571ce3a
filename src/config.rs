//! Application configuration.
//!
//! Loaded from an optional JSON file, then overridden from the environment
//! (after `dotenv`). Everything here is read once at startup.

use crate::error::{Text2SqlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DATASOURCE_TICKET_DISTRIBUTION: &str = "ticket-distribution";
pub const DATASOURCE_TICKET_BOOKING: &str = "ticket-booking";
pub const DATASOURCE_TEXT2SQL_DB: &str = "text2sql-db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default = "default_datasources")]
    pub datasources: Vec<DataSourceConfig>,

    #[serde(default = "default_datasource_name")]
    pub default_datasource: String,

    /// Directory of `*.txt` prompt overrides
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,

    /// Known join conditions handed to the business rule advisor
    #[serde(default)]
    pub join_hints: Vec<JoinHint>,

    /// Additionally require the statement to parse as exactly one query
    #[serde(default)]
    pub strict_sql: bool,

    /// Ask the model to narrate stage-5 results
    #[serde(default)]
    pub summarize_results: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: BackendKind,
    /// File path or `:memory:` for sqlite, connection URL for postgres
    pub url: String,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinHint {
    pub left: String,
    pub right: String,
    pub condition: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_max_rows() -> usize {
    1000
}

fn default_datasource_name() -> String {
    DATASOURCE_TICKET_DISTRIBUTION.to_string()
}

fn default_datasources() -> Vec<DataSourceConfig> {
    let sqlite = |name: &str, aliases: &[&str], file: &str| DataSourceConfig {
        name: name.to_string(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        kind: BackendKind::Sqlite,
        url: file.to_string(),
        max_rows: default_max_rows(),
    };

    vec![
        sqlite(DATASOURCE_TICKET_DISTRIBUTION, &["distribution", "primary", "master"], "data/ticket_distribution.db"),
        sqlite(DATASOURCE_TICKET_BOOKING, &["booking", "order"], "data/ticket_booking.db"),
        sqlite(DATASOURCE_TEXT2SQL_DB, &["text2sql", "local", "test"], "data/text2sql.db"),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            datasources: default_datasources(),
            default_datasource: default_datasource_name(),
            prompts_dir: None,
            join_hints: Vec::new(),
            strict_sql: false,
            summarize_results: false,
        }
    }
}

impl AppConfig {
    /// Read a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// File (if any) plus environment overrides, validated
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from a key lookup; split out so tests need not touch the process env
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("TEXT2SQL_MODEL") {
            self.llm.model = model;
        }
        if let Some(dir) = lookup("TEXT2SQL_PROMPTS_DIR") {
            self.prompts_dir = Some(PathBuf::from(dir));
        }
        if let Some(name) = lookup("TEXT2SQL_DEFAULT_DATASOURCE") {
            self.default_datasource = name;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.datasources.is_empty() {
            return Err(Text2SqlError::Config("at least one datasource is required".to_string()));
        }

        let mut seen = HashSet::new();
        for ds in &self.datasources {
            for key in std::iter::once(&ds.name).chain(ds.aliases.iter()) {
                let key = key.trim().to_lowercase();
                if key.is_empty() {
                    return Err(Text2SqlError::Config(format!("datasource '{}' has a blank name or alias", ds.name)));
                }
                if !seen.insert(key.clone()) {
                    return Err(Text2SqlError::Config(format!("datasource name or alias '{}' is defined twice", key)));
                }
            }
            if ds.max_rows == 0 {
                return Err(Text2SqlError::Config(format!("datasource '{}' has max_rows = 0", ds.name)));
            }
        }

        let default = self.default_datasource.to_lowercase();
        if !self.datasources.iter().any(|ds| ds.name.to_lowercase() == default) {
            return Err(Text2SqlError::Config(format!(
                "default datasource '{}' is not configured",
                self.default_datasource
            )));
        }

        Ok(())
    }
}
