//! Search backend abstraction.
//!
//! The [`SearchBackend`] trait covers the two query shapes the strategies
//! issue against the document collection:
//!
//! | Method | Used by | Shape |
//! |--------|---------|-------|
//! | [`filter_search`](SearchBackend::filter_search) | structured filter search | explicit clauses + optional keywords |
//! | [`hybrid_search`](SearchBackend::hybrid_search) | semantic search | query text + one vector query per vector field |
//!
//! Implementations:
//! - [`azure::AzureSearchBackend`]: Azure AI Search REST API.
//! - [`memory::InMemoryIndex`]: a JSON document file held in memory.

pub mod azure;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::{RetrievalConfig, SearchConfig};
use crate::error::BackendError;
use crate::models::SearchResult;

/// Index field names of the enforcement document collection.
pub mod fields {
    pub const ID: &str = "ID";
    pub const TITLE: &str = "Title";
    pub const BROWSER_FILE: &str = "BrowserFile";
    pub const KEY_FACTS: &str = "KeyFacts";
    pub const DOCUMENT_TEXT: &str = "DocumentText";
    pub const COMMENTARY: &str = "Commentary";
    pub const DATE_ISSUED: &str = "DateIssued";
    pub const PUBLISHED: &str = "Published";
    pub const DOCUMENT_TYPES: &str = "DocumentTypes";
    pub const NUMBER_OF_VIOLATIONS: &str = "NumberOfViolations";
    pub const SETTLEMENT_AMOUNT: &str = "SettlementAmount";
    pub const SANCTION_PROGRAMS: &str = "SanctionPrograms";
    pub const INDUSTRIES: &str = "Industries";
    pub const LEGAL_ISSUES: &str = "LegalIssues";
    pub const RESPONDENT_NATIONALITY: &str = "RespondentNationality";
    pub const VOLUNTARY_DISCLOSURE: &str = "VoluntaryDisclosure";
    pub const EGREGIOUS_CASE: &str = "EgregiousCase";
    pub const REGULATORY_PROVISIONS: &str = "RegulatoryProvisions";
    pub const ENFORCEMENT_CHARACTERIZATIONS: &str = "EnforcementCharacterizations";
    pub const OFAC_PENALTY: &str = "OfacPenalty";
    pub const AGGREGATE_PENALTY: &str = "AggregatePenalty";
    pub const REFERENCE_COUNT: &str = "ReferenceCount";

    /// Fields returned with every result.
    pub const DISPLAY: &[&str] = &[
        ID,
        BROWSER_FILE,
        TITLE,
        KEY_FACTS,
        DOCUMENT_TEXT,
        COMMENTARY,
        DATE_ISSUED,
        PUBLISHED,
        DOCUMENT_TYPES,
        NUMBER_OF_VIOLATIONS,
        SETTLEMENT_AMOUNT,
        SANCTION_PROGRAMS,
        INDUSTRIES,
        REFERENCE_COUNT,
    ];

    /// Full-text searchable fields.
    pub const TEXT: &[&str] = &[TITLE, KEY_FACTS, DOCUMENT_TEXT, COMMENTARY];

    /// Full-text fields excluding expert commentary.
    pub const TEXT_WITHOUT_COMMENTARY: &[&str] = &[TITLE, KEY_FACTS, DOCUMENT_TEXT];
}

/// Characters of text kept in a result snippet.
pub const SNIPPET_CHARS: usize = 240;

/// One explicit constraint of a structured filter query.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    /// Issue year within `[from, to]`; either bound may be open.
    YearRange {
        field: &'static str,
        from: Option<i32>,
        to: Option<i32>,
    },
    /// Field (scalar or collection) contains at least one of `values`.
    AnyOf {
        field: &'static str,
        values: Vec<String>,
    },
    /// Numeric field `>= value`.
    AtLeast { field: &'static str, value: f64 },
    /// Numeric field within `[low, high]`; either bound may be open.
    Between {
        field: &'static str,
        low: Option<f64>,
        high: Option<f64>,
    },
    Equals { field: &'static str, value: bool },
}

impl FilterClause {
    pub fn field(&self) -> &'static str {
        match self {
            Self::YearRange { field, .. }
            | Self::AnyOf { field, .. }
            | Self::AtLeast { field, .. }
            | Self::Between { field, .. }
            | Self::Equals { field, .. } => field,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::YearRange { field, from, to } => match (from, to) {
                (Some(f), Some(t)) if f == t => format!("{} in {}", field, f),
                (Some(f), Some(t)) => format!("{} {}–{}", field, f, t),
                (Some(f), None) => format!("{} from {}", field, f),
                (None, Some(t)) => format!("{} through {}", field, t),
                (None, None) => format!("{} (any)", field),
            },
            Self::AnyOf { field, values } => format!("{} in [{}]", field, values.join(", ")),
            Self::AtLeast { field, value } => format!("{} >= {}", field, value),
            Self::Between { field, low, high } => match (low, high) {
                (Some(l), Some(h)) => format!("{} {}–{}", field, l, h),
                (Some(l), None) => format!("{} >= {}", field, l),
                (None, Some(h)) => format!("{} <= {}", field, h),
                (None, None) => format!("{} (any)", field),
            },
            Self::Equals { field, value } => format!("{} = {}", field, value),
        }
    }
}

/// Structured query issued by the filter search strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterQuery {
    pub clauses: Vec<FilterClause>,
    pub keywords: Option<String>,
    /// Restrict keyword matching to these fields; `None` searches all text fields.
    pub search_fields: Option<&'static [&'static str]>,
    pub top: usize,
}

impl FilterQuery {
    /// Names of the fields this query constrains.
    pub fn constrained_fields(&self) -> Vec<&'static str> {
        self.clauses.iter().map(FilterClause::field).collect()
    }

    /// Human-readable rendering, e.g. `DateIssued 2020–2023; keywords "banknotes"`.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.clauses.iter().map(FilterClause::describe).collect();
        if let Some(k) = &self.keywords {
            parts.push(format!("keywords \"{}\"", k));
        }
        if parts.is_empty() {
            "(none)".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Hybrid vector + keyword query issued by the semantic search strategy.
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub text: String,
    pub vector: Vec<f32>,
    pub vector_fields: Vec<String>,
    pub k_nearest: usize,
    pub top: usize,
}

impl HybridQuery {
    pub fn new(text: &str, vector: Vec<f32>, retrieval: &RetrievalConfig) -> Self {
        Self {
            text: text.to_string(),
            vector,
            vector_fields: retrieval.vector_fields.clone(),
            k_nearest: retrieval.k_nearest_neighbors,
            top: retrieval.advanced_top,
        }
    }
}

/// Abstract document search backend.
///
/// Results come back ranked best-first. An empty vector is a valid answer.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn filter_search(&self, query: &FilterQuery) -> Result<Vec<SearchResult>, BackendError>;

    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<SearchResult>, BackendError>;
}

/// Build a [`SearchResult`] from raw index fields, dropping vector fields
/// and deriving a display snippet.
pub fn result_from_fields(id: String, score: f64, raw: &serde_json::Map<String, Value>) -> SearchResult {
    let fields: BTreeMap<String, Value> = raw
        .iter()
        .filter(|(k, _)| !k.starts_with('@') && !k.ends_with("Vector"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let snippet = [fields::COMMENTARY, fields::KEY_FACTS, fields::DOCUMENT_TEXT]
        .iter()
        .filter_map(|f| fields.get(*f).and_then(|v| v.as_str()))
        .find(|s| !s.trim().is_empty())
        .map(|s| s.chars().take(SNIPPET_CHARS).collect::<String>())
        .unwrap_or_default();

    SearchResult {
        document_id: id,
        score,
        fields,
        snippet,
    }
}

/// Document ID as a string, whether the index stores it as text or a number.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Create the configured [`SearchBackend`].
///
/// | Config Value | Backend |
/// |-------------|---------|
/// | `"azure"` | [`azure::AzureSearchBackend`] |
/// | `"memory"` | [`memory::InMemoryIndex`] loaded from `search.documents_path` |
pub fn create_backend(
    config: &SearchConfig,
    retrieval: &RetrievalConfig,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn SearchBackend>> {
    match config.backend.as_str() {
        "azure" => Ok(Arc::new(azure::AzureSearchBackend::new(config, client)?)),
        "memory" => {
            let index = match &config.documents_path {
                Some(path) => memory::InMemoryIndex::load(path, retrieval.hybrid_alpha)?,
                None => memory::InMemoryIndex::new(retrieval.hybrid_alpha),
            };
            Ok(Arc::new(index))
        }
        other => bail!("Unknown search backend: {}", other),
    }
}
