//! Recovers one SQL statement from free-text model output.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

lazy_static! {
    /// From the first SELECT token up to a blank line, a code fence, or end of input
    static ref SQL_RUN: Regex = Regex::new(r"(?is)\bSELECT\b.*?(?:\n[ \t]*\n|```|\z)").unwrap();
    static ref FENCE: Regex = Regex::new(r"(?i)```[ \t]*(?:sql)?").unwrap();
    /// A code block whose body opens with SELECT
    static ref FENCED_SELECT: Regex =
        Regex::new(r"(?is)```[ \t]*(?:sql)?[ \t]*\r?\n\s*(SELECT\b.*?)(?:```|\z)").unwrap();
}

/// Returns the first SELECT statement found in `text`, or `None`.
///
/// A fenced block that opens with SELECT wins over earlier prose, so a
/// sentence like "a query to select the staff" is not taken for SQL.
/// Otherwise prose before the statement is skipped. Anything after the first
/// blank line is dropped, so two candidate statements are never merged.
pub fn extract(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }

    let run = FENCED_SELECT
        .captures(text)
        .and_then(|cap| cap.get(1))
        .and_then(|body| SQL_RUN.find(body.as_str()))
        .or_else(|| SQL_RUN.find(text));
    let Some(run) = run else {
        warn!("No SQL statement found in model output: {}", preview(text));
        return None;
    };

    let sql = FENCE.replace_all(run.as_str(), "");
    let sql = sql.trim();
    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() > MAX {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    } else {
        text.to_string()
    }
}
