//! Read-only, single-statement policy for generated SQL.
//!
//! A mutation keyword anywhere in the text, comments and string literals
//! included, rejects the statement.
//! Strict mode additionally requires the text to parse as exactly one query.

use crate::error::{Text2SqlError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::warn;

pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "REPLACE", "GRANT", "REVOKE",
];

lazy_static! {
    static ref FORBIDDEN: Regex = Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"))).unwrap();
    static ref SECOND_STATEMENT: Regex = Regex::new(r";\s*\S").unwrap();
    static ref LEADING_SELECT: Regex = Regex::new(r"(?i)^SELECT\b").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()) }
    }

    pub fn into_result(self) -> Result<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(Text2SqlError::SafetyViolation(
                self.reason.unwrap_or_else(|| "statement rejected".to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyGate {
    strict: bool,
}

impl SafetyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyword policy plus a full parse that must yield exactly one query
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn with_strict(strict: bool) -> Self {
        Self { strict }
    }

    pub fn check(&self, sql: &str) -> SafetyVerdict {
        let verdict = self.evaluate(sql);
        if let Some(reason) = &verdict.reason {
            warn!("SQL rejected by safety gate: {} ({})", reason, sql);
        }
        verdict
    }

    fn evaluate(&self, sql: &str) -> SafetyVerdict {
        if sql.trim().is_empty() {
            return SafetyVerdict::reject("empty statement");
        }

        if let Some(keyword) = FORBIDDEN.find(sql) {
            return SafetyVerdict::reject(format!(
                "forbidden keyword {}",
                keyword.as_str().to_uppercase()
            ));
        }

        if SECOND_STATEMENT.is_match(sql) {
            return SafetyVerdict::reject("multiple statements");
        }

        if !LEADING_SELECT.is_match(strip_leading_comments(sql)) {
            return SafetyVerdict::reject("statement does not start with SELECT");
        }

        if self.strict {
            match Parser::parse_sql(&GenericDialect {}, sql) {
                Ok(statements) => {
                    if statements.len() != 1 {
                        return SafetyVerdict::reject(format!("expected one statement, parsed {}", statements.len()));
                    }
                    if !matches!(statements[0], Statement::Query(_)) {
                        return SafetyVerdict::reject("statement is not a query");
                    }
                }
                Err(e) => return SafetyVerdict::reject(format!("statement does not parse: {}", e)),
            }
        }

        SafetyVerdict::allow()
    }
}

/// Drops leading whitespace, `--` line comments and `/* */` block comments.
/// An unterminated block comment swallows the rest of the text.
fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(idx) => after[idx + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(idx) => after[idx + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}
