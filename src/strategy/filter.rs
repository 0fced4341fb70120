//! Structured filter search.
//!
//! Extracted [`SearchFilters`] become explicit [`FilterClause`]s. A filter
//! that is absent produces no clause; there are no implicit defaults.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::VocabularyConfig;
use crate::error::RetrievalError;
use crate::index::{fields, FilterClause, FilterQuery, SearchBackend};
use crate::models::{
    Diagnostic, DiagnosticKind, QueryClassification, Route, SearchFilters, SearchResult,
    StrategyOutput,
};

use super::{timed, RetrievalStrategy};

/// Titles listed in the answer text.
const LISTED_RESULTS: usize = 10;

impl FilterQuery {
    /// Translate extracted filters into an explicit query.
    pub fn from_filters(filters: &SearchFilters, vocabulary: &VocabularyConfig, top: usize) -> Self {
        let mut clauses = Vec::new();

        if filters.date_issued_begin.is_some() || filters.date_issued_end.is_some() {
            clauses.push(FilterClause::YearRange {
                field: fields::DATE_ISSUED,
                from: filters.date_issued_begin,
                to: filters.date_issued_end,
            });
        }

        let sets: [(&'static str, &Vec<String>, Option<&HashMap<String, String>>); 9] = [
            (fields::SANCTION_PROGRAMS, &filters.programs, Some(&vocabulary.programs)),
            (fields::INDUSTRIES, &filters.industries, Some(&vocabulary.industries)),
            (fields::DOCUMENT_TYPES, &filters.document_types, Some(&vocabulary.document_types)),
            (fields::LEGAL_ISSUES, &filters.legal_issues, None),
            (fields::RESPONDENT_NATIONALITY, &filters.respondent_nationalities, None),
            (fields::REGULATORY_PROVISIONS, &filters.regulatory_provisions, None),
            (fields::ENFORCEMENT_CHARACTERIZATIONS, &filters.enforcement_characterizations, None),
            (fields::OFAC_PENALTY, &filters.ofac_penalties, None),
            (fields::AGGREGATE_PENALTY, &filters.aggregate_penalties, None),
        ];
        for (field, values, table) in sets {
            if values.is_empty() {
                continue;
            }
            let values = match table {
                Some(table) => values.iter().map(|v| map_display_value(v, table)).collect(),
                None => values.clone(),
            };
            clauses.push(FilterClause::AnyOf { field, values });
        }

        if let Some(min) = filters.min_penalty {
            clauses.push(FilterClause::AtLeast {
                field: fields::SETTLEMENT_AMOUNT,
                value: min,
            });
        }

        if filters.violations_low.is_some() || filters.violations_high.is_some() {
            clauses.push(FilterClause::Between {
                field: fields::NUMBER_OF_VIOLATIONS,
                low: filters.violations_low.map(f64::from),
                high: filters.violations_high.map(f64::from),
            });
        }

        if let Some(published) = filters.published {
            clauses.push(FilterClause::Equals {
                field: fields::PUBLISHED,
                value: published,
            });
        }
        if let Some(voluntary) = filters.voluntary_disclosure {
            clauses.push(FilterClause::Equals {
                field: fields::VOLUNTARY_DISCLOSURE,
                value: voluntary,
            });
        }
        if let Some(egregious) = filters.egregious_case {
            clauses.push(FilterClause::Equals {
                field: fields::EGREGIOUS_CASE,
                value: egregious,
            });
        }

        Self {
            clauses,
            keywords: filters.keywords.clone().filter(|k| !k.trim().is_empty()),
            search_fields: filters
                .exclude_commentaries
                .then_some(fields::TEXT_WITHOUT_COMMENTARY),
            top,
        }
    }
}

/// Map a display value to its index code; unmapped values pass through.
fn map_display_value(value: &str, table: &HashMap<String, String>) -> String {
    if let Some(code) = table.get(value) {
        return code.clone();
    }
    table
        .iter()
        .find(|(display, _)| display.eq_ignore_ascii_case(value))
        .map(|(_, code)| code.clone())
        .unwrap_or_else(|| value.to_string())
}

pub struct FilterSearchStrategy {
    backend: Arc<dyn SearchBackend>,
    vocabulary: VocabularyConfig,
    top: usize,
    timeout: Duration,
}

impl FilterSearchStrategy {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        vocabulary: VocabularyConfig,
        top: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            vocabulary,
            top,
            timeout,
        }
    }

    pub fn build_query(&self, filters: &SearchFilters) -> FilterQuery {
        FilterQuery::from_filters(filters, &self.vocabulary, self.top)
    }

    /// Run one structured search. An empty result is `Ok(vec![])`.
    pub async fn search(&self, filters: &SearchFilters) -> Result<Vec<SearchResult>, RetrievalError> {
        let query = self.build_query(filters);
        self.run(&query).await
    }

    async fn run(&self, query: &FilterQuery) -> Result<Vec<SearchResult>, RetrievalError> {
        tracing::debug!(backend = self.backend.name(), filter = %query.describe(), "filter search");
        timed(
            "search",
            self.timeout,
            self.backend.filter_search(query),
            RetrievalError::Search,
        )
        .await
    }
}

#[async_trait]
impl RetrievalStrategy for FilterSearchStrategy {
    fn route(&self) -> Route {
        Route::BasicSearch
    }

    async fn execute(
        &self,
        _question: &str,
        classification: &QueryClassification,
    ) -> Result<StrategyOutput, RetrievalError> {
        let query = self.build_query(&classification.filters);
        let applied = query.describe();
        let results = self.run(&query).await?;

        let mut diagnostics = Vec::new();
        let answer_text = if results.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::NoResults,
                format!("no documents matched {}", applied),
            ));
            format!("No documents matched the search ({}).", applied)
        } else {
            summarize(&results, &applied)
        };

        Ok(StrategyOutput {
            answer_text,
            results,
            diagnostics,
            applied_filter: Some(applied),
        })
    }
}

fn summarize(results: &[SearchResult], applied: &str) -> String {
    let mut text = format!(
        "Found {} document{} matching {}:\n",
        results.len(),
        if results.len() == 1 { "" } else { "s" },
        applied
    );
    for (i, r) in results.iter().take(LISTED_RESULTS).enumerate() {
        let title = r.title().unwrap_or(&r.document_id);
        match r.text_field(fields::DATE_ISSUED) {
            Some(date) => text.push_str(&format!("{}. {} ({})\n", i + 1, title, date.get(..10).unwrap_or(date))),
            None => text.push_str(&format!("{}. {}\n", i + 1, title)),
        }
    }
    if results.len() > LISTED_RESULTS {
        text.push_str(&format!("…and {} more\n", results.len() - LISTED_RESULTS));
    }
    text
}
