//! Core data models used throughout the routing pipeline.
//!
//! These types represent the classification, filters, retrieved documents
//! and final answer envelope that flow through one request. None of them
//! outlive the request that created them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Retrieval path selected for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Structured filter search.
    BasicSearch,
    /// Hybrid vector + keyword retrieval with a generated answer.
    AdvancedSearch,
    /// Aggregate numeric questions; not yet supported.
    Statistical,
    /// The question needs a follow-up before any retrieval is useful.
    #[serde(rename = "clarification_needed")]
    Clarification,
}

impl Route {
    pub const ALL: [Route; 4] = [
        Route::BasicSearch,
        Route::AdvancedSearch,
        Route::Statistical,
        Route::Clarification,
    ];

    /// Wire label used in prompts, JSON output and trace events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::BasicSearch => "basic_search",
            Route::AdvancedSearch => "advanced_search",
            Route::Statistical => "statistical",
            Route::Clarification => "clarification_needed",
        }
    }

    /// Parse a label produced by the classification model.
    ///
    /// Returns `None` for anything outside the known set; callers decide
    /// how to treat unknown labels.
    pub fn from_label(label: &str) -> Option<Route> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "basic_search" | "basicsearch" | "basic" => Some(Route::BasicSearch),
            "advanced_search" | "advancedsearch" | "advanced" => Some(Route::AdvancedSearch),
            "statistical" | "nl2sql" | "statistics" => Some(Route::Statistical),
            "clarification_needed" | "clarification" => Some(Route::Clarification),
            _ => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured filters extracted from a basic-search question.
///
/// Every member is independently optional. An absent member must never
/// constrain the query. The PascalCase aliases accept the field names of
/// the legacy search-parameter schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// First year of the issue-date range (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(alias = "DateIssuedBegin")]
    pub date_issued_begin: Option<i32>,
    /// Last year of the issue-date range (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(alias = "DateIssuedEnd")]
    pub date_issued_end: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "Program")]
    pub programs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "Industry")]
    pub industries: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "DocumentType")]
    pub document_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "LegalIssue")]
    pub legal_issues: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "RespondentNationality")]
    pub respondent_nationalities: Vec<String>,
    /// Cited regulation sections, e.g. "31 CFR 560.204".
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "RegulatoryProvision")]
    pub regulatory_provisions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "EnforcementCharacterization")]
    pub enforcement_characterizations: Vec<String>,
    /// Penalty bands as labelled in the index.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "OFACPenalty")]
    pub ofac_penalties: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(alias = "AggregatePenalty")]
    pub aggregate_penalties: Vec<String>,
    /// Lower bound on the settlement amount, in USD.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(alias = "NumberOfViolationsLow")]
    pub violations_low: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(alias = "NumberOfViolationsHigh")]
    pub violations_high: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(alias = "Published")]
    pub published: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(alias = "VoluntaryDisclosure", deserialize_with = "deserialize_flag")]
    pub voluntary_disclosure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(alias = "EgregiousCase", deserialize_with = "deserialize_flag")]
    pub egregious_case: Option<bool>,
    /// Free-text keywords to combine with the filters.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(alias = "KeyWords")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[serde(alias = "ExcludeCommentaries")]
    pub exclude_commentaries: bool,
}

impl SearchFilters {
    /// Filters carrying nothing but free-text keywords.
    pub fn keywords_only(keywords: &str) -> Self {
        Self {
            keywords: Some(keywords.trim().to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Accept a yes/no filter as a boolean or in the legacy coded form.
///
/// Legacy replies send a list of codes (`[1]` yes, `[0]` or `[2]` no,
/// `[-1]` not stated) or the matching strings. A list that mixes yes and
/// no, or carries only "not stated", leaves the filter unset.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(flag_from_value))
}

fn flag_from_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) | Some(2) => Some(false),
            _ => None,
        },
        Value::String(s) => {
            let code = s.trim().trim_matches(|c| c == '{' || c == '}').trim();
            match code.to_ascii_lowercase().as_str() {
                "1" | "yes" | "y" | "true" => Some(true),
                "0" | "2" | "no" | "n" | "false" => Some(false),
                _ => None,
            }
        }
        Value::Array(items) => {
            let mut flags = items.iter().filter_map(flag_from_value);
            let first = flags.next()?;
            flags.all(|f| f == first).then_some(first)
        }
        _ => None,
    }
}

/// Result of classifying one question. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryClassification {
    pub route: Route,
    /// Model-reported confidence in `[0.0, 1.0]`, if it gave one.
    pub confidence: Option<f64>,
    /// Populated only when `route` is [`Route::BasicSearch`].
    pub filters: SearchFilters,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<String>,
}

impl QueryClassification {
    pub fn new(route: Route, rationale: impl Into<String>) -> Self {
        Self {
            route,
            confidence: None,
            filters: SearchFilters::default(),
            rationale: rationale.into(),
            clarification_question: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_clarification(mut self, question: impl Into<String>) -> Self {
        self.clarification_question = Some(question.into());
        self
    }
}

/// A ranked document returned by a retrieval strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub score: f64,
    /// Original index field values, keyed by index field name.
    pub fields: BTreeMap<String, Value>,
    /// Short excerpt for display (commentary or key facts).
    pub snippet: String,
}

impl SearchResult {
    pub fn new(document_id: impl Into<String>, score: f64) -> Self {
        Self {
            document_id: document_id.into(),
            score,
            fields: BTreeMap::new(),
            snippet: String::new(),
        }
    }

    /// String value of a field, if present and non-empty.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.text_field("Title")
    }
}

/// Category of a non-fatal note attached to an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The selected strategy failed or timed out; the answer is degraded.
    RetrievalFailure,
    /// The route has no implementation yet.
    UnsupportedRoute,
    /// The classifier was unsure of its route.
    LowConfidence,
    /// Retrieval succeeded but matched nothing.
    NoResults,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::RetrievalFailure => "retrieval_failure",
            DiagnosticKind::UnsupportedRoute => "unsupported_route",
            DiagnosticKind::LowConfidence => "low_confidence",
            DiagnosticKind::NoResults => "no_results",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What a strategy hands back to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct StrategyOutput {
    pub answer_text: String,
    pub results: Vec<SearchResult>,
    pub diagnostics: Vec<Diagnostic>,
    /// Human-readable rendering of the query actually sent, for provenance.
    pub applied_filter: Option<String>,
}

/// Final answer returned to the caller of `submit_question`.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerEnvelope {
    pub request_id: Uuid,
    pub question: String,
    pub answer_text: String,
    /// The route that was actually executed.
    pub route: Route,
    pub supporting_results: Vec<SearchResult>,
    pub classification: QueryClassification,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_filter: Option<String>,
}

impl AnswerEnvelope {
    pub fn has_diagnostic(&self, kind: DiagnosticKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }
}
