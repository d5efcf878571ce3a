//! Business Rule Advisor
//!
//! Deterministic heuristics that annotate a rewritten question before the
//! inference stage: time windows, join conditions, fields worth selecting and
//! aggregation intent. Nothing here talks to the model or a database.

use crate::config::JoinHint;
use chrono::{Datelike, Days, Months, NaiveDate};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// Annotation used when no heuristic applies
pub const FALLBACK_ANNOTATION: &str = "generic analysis";

const SEPARATOR: &str = "; ";

lazy_static! {
    static ref RELATIVE_SPAN: Regex =
        Regex::new(r"\b(?:last|past|previous)\s+(\d{1,4})\s+(day|week|month|year)s?\b").unwrap();
    static ref TOP_N: Regex = Regex::new(r"\b(top|bottom|first)\s+(\d{1,6})\b").unwrap();
    static ref TABLE_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap();
    static ref LIST_MARKER: Regex = Regex::new(r"^(?:[-*•]+|\d+[.)])\s*").unwrap();
}

/// Keyword groups mapped to the column they usually imply
const FIELD_KEYWORDS: &[(&[&str], &str)] = &[
    (
        &["today", "yesterday", "week", "month", "year", "days", "recent", "date", "when", "since"],
        "created_at",
    ),
    (&["status", "pending", "completed", "cancelled", "canceled", "active", "open", "closed"], "status"),
    (&["price", "amount", "revenue", "cost", "spend", "spent", "total"], "amount"),
    (&["name", "names", "who"], "name"),
];

const AGGREGATIONS: &[(&[&str], &str)] = &[
    (&["how many", "count", "number of"], "COUNT"),
    (&["total", "sum"], "SUM"),
    (&["average", "avg", "mean"], "AVG"),
    (&["maximum", "max", "highest", "largest", "most expensive"], "MAX"),
    (&["minimum", "min", "lowest", "smallest", "cheapest"], "MIN"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    TimeRange,
    Join,
    Fields,
    Aggregation,
}

impl RuleCategory {
    pub fn label(&self) -> &'static str {
        match self {
            RuleCategory::TimeRange => "time range",
            RuleCategory::Join => "join",
            RuleCategory::Fields => "fields",
            RuleCategory::Aggregation => "aggregation",
        }
    }
}

/// Ordered (category, text) pairs; only non-empty rules are kept
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusinessRuleSet {
    rules: Vec<(RuleCategory, String)>,
}

impl BusinessRuleSet {
    pub fn push(&mut self, category: RuleCategory, text: String) {
        let text = text.trim();
        if !text.is_empty() {
            self.rules.push((category, text.to_string()));
        }
    }

    pub fn rules(&self) -> &[(RuleCategory, String)] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Single string fed to the inference template
    pub fn annotation(&self) -> String {
        if self.rules.is_empty() {
            return FALLBACK_ANNOTATION.to_string();
        }
        self.rules
            .iter()
            .map(|(category, text)| format!("{}: {}", category.label(), text))
            .join(SEPARATOR)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BusinessRuleAdvisor {
    join_hints: Vec<JoinHint>,
}

impl BusinessRuleAdvisor {
    pub fn new(join_hints: Vec<JoinHint>) -> Self {
        Self { join_hints }
    }

    /// Rules for a rewritten question and the table-selection output
    pub fn build(&self, query: &str, selected_tables: &str, today: NaiveDate) -> BusinessRuleSet {
        let tables = parse_table_list(selected_tables);
        let mut set = BusinessRuleSet::default();

        set.push(RuleCategory::TimeRange, infer_time_range(query, today));
        if let [left, right, ..] = tables.as_slice() {
            set.push(RuleCategory::Join, self.infer_join_rule(left, right));
        }
        for table in &tables {
            set.push(RuleCategory::Fields, infer_field_requirements(query, table));
        }
        set.push(RuleCategory::Aggregation, infer_aggregation(query));
        set
    }

    /// Configured hint if one covers the pair, else the `<left>.<right>_id`
    /// naming convention
    pub fn infer_join_rule(&self, left: &str, right: &str) -> String {
        let (left, right) = (left.trim(), right.trim());
        if left.is_empty() || right.is_empty() || left.eq_ignore_ascii_case(right) {
            return String::new();
        }

        let configured = self.join_hints.iter().find(|hint| {
            (hint.left.eq_ignore_ascii_case(left) && hint.right.eq_ignore_ascii_case(right))
                || (hint.left.eq_ignore_ascii_case(right) && hint.right.eq_ignore_ascii_case(left))
        });
        if let Some(hint) = configured {
            return format!("{} JOIN {} ON {}", left, right, hint.condition);
        }

        format!("{} JOIN {} ON {}.{}_id = {}.id", left, right, left, singular(bare_name(right)), right)
    }
}

/// Concrete date window for relative time phrases, resolved against `today`
pub fn infer_time_range(query: &str, today: NaiveDate) -> String {
    let q = query.to_lowercase();

    if let Some(caps) = RELATIVE_SPAN.captures(&q) {
        let n: u32 = caps[1].parse().unwrap_or(0);
        let start = match &caps[2] {
            "day" => today.checked_sub_days(Days::new(n as u64)),
            "week" => today.checked_sub_days(Days::new(n as u64 * 7)),
            "month" => today.checked_sub_months(Months::new(n)),
            _ => today.checked_sub_months(Months::new(n.saturating_mul(12))),
        };
        return start.map(|s| span(s, today)).unwrap_or_default();
    }

    let week_start = today.checked_sub_days(Days::new(today.weekday().num_days_from_monday() as u64));
    let month_start = today.with_day(1);
    let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1);

    let window = if q.contains("yesterday") {
        today.pred_opt().map(|d| (d, d))
    } else if q.contains("today") {
        Some((today, today))
    } else if q.contains("last week") {
        week_start.and_then(|ws| Some((ws.checked_sub_days(Days::new(7))?, ws.pred_opt()?)))
    } else if q.contains("this week") {
        week_start.map(|ws| (ws, today))
    } else if q.contains("last month") {
        month_start.and_then(|ms| Some((ms.checked_sub_months(Months::new(1))?, ms.pred_opt()?)))
    } else if q.contains("this month") {
        month_start.map(|ms| (ms, today))
    } else if q.contains("last year") {
        year_start.and_then(|ys| Some((NaiveDate::from_ymd_opt(ys.year() - 1, 1, 1)?, ys.pred_opt()?)))
    } else if q.contains("this year") {
        year_start.map(|ys| (ys, today))
    } else {
        None
    };

    window.map(|(start, end)| span(start, end)).unwrap_or_default()
}

fn span(start: NaiveDate, end: NaiveDate) -> String {
    if start == end {
        format!("{}", start.format("%Y-%m-%d"))
    } else {
        format!("{} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
    }
}

/// Columns of `table` the question appears to need
pub fn infer_field_requirements(query: &str, table: &str) -> String {
    let table = table.trim();
    if table.is_empty() {
        return String::new();
    }
    let q = query.to_lowercase();
    let fields: Vec<&str> = FIELD_KEYWORDS
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| mentions(&q, k)))
        .map(|(_, field)| *field)
        .collect();

    if fields.is_empty() {
        String::new()
    } else {
        format!("{}({})", table, fields.join(", "))
    }
}

/// Aggregate functions and ordering implied by the question
pub fn infer_aggregation(query: &str) -> String {
    let q = query.to_lowercase();
    let mut parts: Vec<String> = AGGREGATIONS
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| mentions(&q, k)))
        .map(|(_, func)| func.to_string())
        .collect();

    if let Some(caps) = TOP_N.captures(&q) {
        let direction = if &caps[1] == "bottom" { "ASC" } else { "DESC" };
        parts.push(format!("ORDER BY {} LIMIT {}", direction, &caps[2]));
    }

    parts.join(", ")
}

/// Table names from free-form table-selection output.
///
/// Accepts comma or newline separated names with optional list markers and
/// backticks; lines of prose are skipped. Order is kept, duplicates dropped.
pub fn parse_table_list(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c == '\n')
        .map(|piece| {
            let piece = LIST_MARKER.replace(piece.trim(), "");
            piece
                .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.' || c.is_whitespace())
                .to_string()
        })
        .filter(|name| TABLE_NAME.is_match(name))
        .unique_by(|name| name.to_lowercase())
        .collect()
}

fn mentions(haystack: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return haystack.contains(keyword);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|word| word == keyword)
}

fn bare_name(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

fn singular(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{}y", stem)
    } else if name.ends_with("ss") {
        name.to_string()
    } else if let Some(stem) = name.strip_suffix('s') {
        stem.to_string()
    } else {
        name.to_string()
    }
}
