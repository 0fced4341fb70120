//! Question classification.
//!
//! [`LlmClassifier`] asks the chat model for a JSON classification object and
//! turns the reply into a [`QueryClassification`]. Replies are parsed
//! leniently: markdown fences are stripped, and when the text is not a bare
//! JSON object the first balanced `{…}` block inside it is used instead.
//!
//! The classifier makes exactly one model call per `classify`; retries and
//! timeouts belong to the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClassificationError;
use crate::http::truncate;
use crate::llm::{ChatModel, ChatRequest};
use crate::models::{QueryClassification, Route, SearchFilters};
use crate::prompts::{classification_message, CLASSIFICATION_PROMPT};

/// Years before this are almost certainly extraction mistakes.
const EARLIEST_PLAUSIBLE_YEAR: i32 = 1900;
/// Years representable in an index date literal.
const VALID_YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, question: &str) -> Result<QueryClassification, ClassificationError>;
}

pub struct LlmClassifier {
    chat: Arc<dyn ChatModel>,
    temperature: f32,
}

impl LlmClassifier {
    pub fn new(chat: Arc<dyn ChatModel>, temperature: f32) -> Self {
        Self { chat, temperature }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, question: &str) -> Result<QueryClassification, ClassificationError> {
        if question.trim().is_empty() {
            return Err(ClassificationError::InvalidInput(
                "question is empty".to_string(),
            ));
        }

        let user = classification_message(question);
        let request = ChatRequest {
            system: CLASSIFICATION_PROMPT,
            user: &user,
            temperature: Some(self.temperature),
            json_mode: true,
        };

        let reply = self.chat.complete(&request).await?;
        tracing::debug!(model = self.chat.model_name(), reply = %truncate(&reply, 300), "classifier reply");
        parse_classification(&reply, question)
    }
}

/// Turn a model reply into a classification.
///
/// `question` is used as the keyword fallback when a basic-search reply
/// carries an unusable filter object.
pub fn parse_classification(
    reply: &str,
    question: &str,
) -> Result<QueryClassification, ClassificationError> {
    let value = extract_json_object(reply)
        .ok_or_else(|| ClassificationError::Unparseable(truncate(reply.trim(), 200)))?;

    let label = value
        .get("query_type")
        .or_else(|| value.get("route"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ClassificationError::Unparseable("reply has no query_type".to_string()))?;

    let route = Route::from_label(label).unwrap_or_else(|| {
        tracing::warn!(label, "unknown query type, asking for clarification");
        Route::Clarification
    });

    let rationale = value
        .get("reasoning")
        .or_else(|| value.get("rationale"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut classification = QueryClassification::new(route, rationale);

    if let Some(confidence) = value.get("confidence").and_then(|v| v.as_f64()) {
        classification = classification.with_confidence(confidence);
    }

    if let Some(q) = value
        .get("clarification_question")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
    {
        classification = classification.with_clarification(q);
    }

    if route == Route::BasicSearch {
        classification = classification.with_filters(parse_filters(value.get("filters"), question));
    }

    Ok(classification)
}

/// Deserialize and normalize the `filters` member.
///
/// A missing or malformed object degrades to a keyword search on the whole
/// question rather than failing the classification.
fn parse_filters(value: Option<&Value>, question: &str) -> SearchFilters {
    let filters = match value {
        Some(v @ Value::Object(_)) => match serde_json::from_value::<SearchFilters>(v.clone()) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "malformed filters, falling back to keyword search");
                return SearchFilters::keywords_only(question);
            }
        },
        _ => {
            tracing::warn!("basic_search reply without filters, falling back to keyword search");
            return SearchFilters::keywords_only(question);
        }
    };
    normalize_filters(filters)
}

fn normalize_filters(mut filters: SearchFilters) -> SearchFilters {
    for year in [&mut filters.date_issued_begin, &mut filters.date_issued_end] {
        if let Some(y) = *year {
            if !VALID_YEARS.contains(&y) {
                tracing::warn!(year = y, "year outside 1..=9999 dropped from extracted filters");
                *year = None;
            }
        }
    }
    if let (Some(begin), Some(end)) = (filters.date_issued_begin, filters.date_issued_end) {
        if begin > end {
            filters.date_issued_begin = Some(end);
            filters.date_issued_end = Some(begin);
        }
    }
    for year in [filters.date_issued_begin, filters.date_issued_end].into_iter().flatten() {
        if year < EARLIEST_PLAUSIBLE_YEAR {
            tracing::warn!(year, "suspicious year in extracted filters");
        }
    }

    filters.keywords = filters
        .keywords
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());

    for list in [
        &mut filters.programs,
        &mut filters.industries,
        &mut filters.document_types,
        &mut filters.legal_issues,
        &mut filters.respondent_nationalities,
        &mut filters.regulatory_provisions,
        &mut filters.enforcement_characterizations,
        &mut filters.ofac_penalties,
        &mut filters.aggregate_penalties,
    ] {
        let mut cleaned: Vec<String> = Vec::with_capacity(list.len());
        for item in list.drain(..) {
            let item = item.trim().to_string();
            if !item.is_empty() && !cleaned.contains(&item) {
                cleaned.push(item);
            }
        }
        *list = cleaned;
    }

    filters
}

/// Find a JSON object in free-form model output.
fn extract_json_object(text: &str) -> Option<Value> {
    let stripped = strip_code_fences(text);
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(stripped) {
        return Some(v);
    }

    let mut search_from = 0;
    while let Some(offset) = stripped[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_object_end(&stripped[start..]) {
            if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&stripped[start..start + end]) {
                return Some(v);
            }
        }
        search_from = start + 1;
    }
    None
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening fence line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or_default();
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Byte length of the balanced `{…}` prefix of `text`, honouring strings.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
