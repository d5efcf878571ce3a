//! Prompt templates
//!
//! Templates are plain text with `{name}` placeholders. The built-in set is
//! compiled in from `prompts/`; a directory of `*.txt` files can override any
//! of them by file stem.

use crate::error::{Text2SqlError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

pub const STEP1_QUERY_REWRITE: &str = "step1-query-rewrite";
pub const STEP2_TABLE_SELECTION: &str = "step2-table-selection";
pub const STEP2_TABLE_SELECTION_WITH_TABLES: &str = "step2-table-selection-with-tables";
pub const STEP3_INFORMATION_INFERENCE: &str = "step3-information-inference";
pub const STEP4_SQL_GENERATION: &str = "step4-sql-generation";
pub const STEP5_SQL_EXECUTION: &str = "step5-sql-execution";
pub const SQL_GENERATION: &str = "sql-generation";
pub const SQL_GENERATION_WITH_TABLES: &str = "sql-generation-with-tables";

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (STEP1_QUERY_REWRITE, include_str!("../prompts/step1-query-rewrite.txt")),
    (STEP2_TABLE_SELECTION, include_str!("../prompts/step2-table-selection.txt")),
    (STEP2_TABLE_SELECTION_WITH_TABLES, include_str!("../prompts/step2-table-selection-with-tables.txt")),
    (STEP3_INFORMATION_INFERENCE, include_str!("../prompts/step3-information-inference.txt")),
    (STEP4_SQL_GENERATION, include_str!("../prompts/step4-sql-generation.txt")),
    (STEP5_SQL_EXECUTION, include_str!("../prompts/step5-sql-execution.txt")),
    (SQL_GENERATION, include_str!("../prompts/sql-generation.txt")),
    (SQL_GENERATION_WITH_TABLES, include_str!("../prompts/sql-generation-with-tables.txt")),
];

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Named template variables
pub type Variables = BTreeMap<String, String>;

/// Builds a [`Variables`] map from `(name, value)` pairs.
pub fn vars<I, K, V>(pairs: I) -> Variables
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: normalize(&text.into()) }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Placeholder names in order of first appearance
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cap in PLACEHOLDER.captures_iter(&self.text) {
            let name = cap[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Substitutes every placeholder; a placeholder without a variable is an error.
    /// Substituted values are not re-scanned.
    pub fn render(&self, variables: &Variables) -> Result<String> {
        let missing: Vec<String> = self
            .placeholders()
            .into_iter()
            .filter(|name| !variables.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(Text2SqlError::Template(format!(
                "missing template variable(s): {}",
                missing.join(", ")
            )));
        }

        let rendered = PLACEHOLDER.replace_all(&self.text, |cap: &regex::Captures| {
            variables.get(&cap[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

/// Named prompt resources
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptLibrary {
    pub fn builtin() -> Self {
        let templates = BUILTIN_TEMPLATES
            .iter()
            .map(|(name, text)| (name.to_string(), PromptTemplate::new(*text)))
            .collect();
        Self { templates }
    }

    /// Built-ins overridden by every `*.txt` file in `dir`
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut library = Self::builtin();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path)?;
            debug!("Loaded prompt override '{}' from {}", name, path.display());
            library.insert(name, text);
        }
        info!("Prompt library ready with {} templates", library.templates.len());
        Ok(library)
    }

    pub fn insert(&mut self, name: &str, text: impl Into<String>) {
        self.templates.insert(name.to_string(), PromptTemplate::new(text));
    }

    pub fn get(&self, name: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| Text2SqlError::Template(format!("unknown prompt template '{}'", name)))
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}
