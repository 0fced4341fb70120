//! In-memory [`SearchBackend`] over a JSON document file.
//!
//! The file holds either a JSON array of documents or an index export of the
//! form `{"value": [...]}`. Every document needs an `ID`; fields whose name
//! ends in `Vector` are treated as embeddings.
//!
//! Keyword scoring is a term-match count. Hybrid search normalizes keyword
//! and vector scores independently (min-max) and merges them as
//! `(1-α)*keyword + α*vector`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate};
use serde_json::Value;

use crate::embedding::cosine_similarity;
use crate::error::BackendError;
use crate::models::SearchResult;

use super::{fields, id_string, result_from_fields, FilterClause, FilterQuery, HybridQuery, SearchBackend};

#[derive(Debug)]
struct IndexedDocument {
    id: String,
    raw: serde_json::Map<String, Value>,
    vectors: HashMap<String, Vec<f32>>,
}

impl IndexedDocument {
    fn text_lower(&self, names: &[&str]) -> String {
        names
            .iter()
            .filter_map(|n| self.raw.get(*n).and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase()
    }
}

/// Read-only in-memory index for local use and tests.
#[derive(Debug)]
pub struct InMemoryIndex {
    docs: Vec<IndexedDocument>,
    alpha: f64,
}

impl InMemoryIndex {
    pub fn new(alpha: f64) -> Self {
        Self {
            docs: Vec::new(),
            alpha,
        }
    }

    pub fn load(path: &Path, alpha: f64) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read documents file: {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse documents file: {}", path.display()))?;
        let index = Self::from_json(value, alpha)?;
        tracing::debug!(documents = index.len(), path = %path.display(), "loaded in-memory index");
        Ok(index)
    }

    pub fn from_json(value: Value, alpha: f64) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("value") {
                Some(Value::Array(items)) => items,
                _ => bail!("documents object must carry a \"value\" array"),
            },
            _ => bail!("documents file must be a JSON array"),
        };

        let mut index = Self::new(alpha);
        for item in items {
            index.insert(item)?;
        }
        Ok(index)
    }

    pub fn insert(&mut self, document: Value) -> Result<()> {
        let Value::Object(raw) = document else {
            bail!("document must be a JSON object");
        };
        let id = raw
            .get(fields::ID)
            .and_then(id_string)
            .ok_or_else(|| anyhow::anyhow!("document is missing an ID"))?;

        let vectors = raw
            .iter()
            .filter(|(k, _)| k.ends_with("Vector"))
            .filter_map(|(k, v)| {
                let values = v.as_array()?;
                let vector: Vec<f32> = values.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect();
                (vector.len() == values.len()).then(|| (k.clone(), vector))
            })
            .collect();

        self.docs.retain(|d| d.id != id);
        self.docs.push(IndexedDocument { id, raw, vectors });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn result(&self, doc: &IndexedDocument, score: f64) -> SearchResult {
        result_from_fields(doc.id.clone(), score, &doc.raw)
    }
}

#[async_trait]
impl SearchBackend for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn filter_search(&self, query: &FilterQuery) -> Result<Vec<SearchResult>, BackendError> {
        let terms = query_terms(query.keywords.as_deref().unwrap_or_default());
        let search_fields = query.search_fields.unwrap_or(fields::TEXT);

        let mut scored: Vec<(&IndexedDocument, f64)> = self
            .docs
            .iter()
            .filter(|d| query.clauses.iter().all(|c| matches_clause(&d.raw, c)))
            .filter_map(|d| {
                if terms.is_empty() {
                    return Some((d, 1.0));
                }
                let hits = term_hits(&d.text_lower(search_fields), &terms);
                (hits > 0).then_some((d, hits as f64))
            })
            .collect();

        sort_ranked(&mut scored, |(d, s)| (*s, d.id.as_str()));
        scored.truncate(query.top);
        Ok(scored.into_iter().map(|(d, s)| self.result(d, s)).collect())
    }

    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<SearchResult>, BackendError> {
        let terms = query_terms(&query.text);

        let keyword: Vec<(usize, f64)> = self
            .docs
            .iter()
            .enumerate()
            .filter_map(|(i, d)| {
                let hits = term_hits(&d.text_lower(fields::TEXT), &terms);
                (hits > 0).then_some((i, hits as f64))
            })
            .collect();

        // Per vector field, keep the k nearest documents; a document's vector
        // score is its best similarity across fields.
        let mut vector_best: HashMap<usize, f64> = HashMap::new();
        for field in &query.vector_fields {
            let mut sims: Vec<(usize, f64)> = self
                .docs
                .iter()
                .enumerate()
                .filter_map(|(i, d)| {
                    let v = d.vectors.get(field)?;
                    Some((i, cosine_similarity(&query.vector, v) as f64))
                })
                .collect();
            sims.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            sims.truncate(query.k_nearest);
            for (i, sim) in sims {
                let best = vector_best.entry(i).or_insert(f64::NEG_INFINITY);
                if sim > *best {
                    *best = sim;
                }
            }
        }
        let vector: Vec<(usize, f64)> = vector_best.into_iter().collect();

        let kw_norm = normalize_scores(&keyword);
        let vec_norm = normalize_scores(&vector);

        let mut merged: BTreeMap<usize, f64> = BTreeMap::new();
        for i in kw_norm.keys().chain(vec_norm.keys()) {
            let k = kw_norm.get(i).copied().unwrap_or(0.0);
            let v = vec_norm.get(i).copied().unwrap_or(0.0);
            merged.insert(*i, (1.0 - self.alpha) * k + self.alpha * v);
        }

        let mut scored: Vec<(&IndexedDocument, f64)> =
            merged.into_iter().map(|(i, s)| (&self.docs[i], s)).collect();
        sort_ranked(&mut scored, |(d, s)| (*s, d.id.as_str()));
        scored.truncate(query.top);
        Ok(scored.into_iter().map(|(d, s)| self.result(d, s)).collect())
    }
}

fn query_terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

fn term_hits(text: &str, terms: &[String]) -> usize {
    terms.iter().filter(|t| text.contains(t.as_str())).count()
}

/// Sort by score descending, then ID ascending for deterministic output.
fn sort_ranked<T>(items: &mut [T], key: impl Fn(&T) -> (f64, &str)) {
    items.sort_by(|a, b| {
        let (sa, ia) = key(a);
        let (sb, ib) = key(b);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ia.cmp(ib))
    });
}

/// Min-max normalize raw scores to `[0, 1]`. All-equal inputs map to 1.0.
fn normalize_scores(candidates: &[(usize, f64)]) -> HashMap<usize, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }

    let s_min = candidates.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let s_max = candidates.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|(i, raw)| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (raw - s_min) / (s_max - s_min)
            };
            (*i, norm)
        })
        .collect()
}

fn matches_clause(raw: &serde_json::Map<String, Value>, clause: &FilterClause) -> bool {
    let value = raw.get(clause.field());
    match clause {
        FilterClause::YearRange { from, to, .. } => match value.and_then(year_of) {
            Some(year) => from.map_or(true, |f| year >= f) && to.map_or(true, |t| year <= t),
            None => false,
        },
        FilterClause::AnyOf { values, .. } => {
            let present = value.map(string_values).unwrap_or_default();
            present
                .iter()
                .any(|p| values.iter().any(|v| p.eq_ignore_ascii_case(v)))
        }
        FilterClause::AtLeast { value: min, .. } => value.and_then(number_of).is_some_and(|n| n >= *min),
        FilterClause::Between { low, high, .. } => match value.and_then(number_of) {
            Some(n) => low.map_or(true, |l| n >= l) && high.map_or(true, |h| n <= h),
            None => false,
        },
        FilterClause::Equals { value: expected, .. } => value.and_then(bool_of) == Some(*expected),
    }
}

fn year_of(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.year());
            }
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(d.year());
            }
            s.get(..4).and_then(|y| y.parse().ok())
        }
        _ => None,
    }
}

fn string_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().flat_map(string_values).collect(),
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .chars()
            .filter(|c| !matches!(c, '$' | ',' | ' '))
            .collect::<String>()
            .parse()
            .ok(),
        _ => None,
    }
}

fn bool_of(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}
