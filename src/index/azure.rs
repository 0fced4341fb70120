//! Azure AI Search REST backend.
//!
//! Both query shapes go to `POST {endpoint}/indexes/{index}/docs/search`.
//! Filter clauses are rendered as OData `$filter` expressions; hybrid
//! queries send the question text together with one vector query per
//! configured vector field.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::error::BackendError;
use crate::http::{api_key_from_env, send_json};
use crate::models::SearchResult;

use super::{fields, id_string, result_from_fields, FilterClause, FilterQuery, HybridQuery, SearchBackend};

pub struct AzureSearchBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl AzureSearchBackend {
    pub fn new(config: &SearchConfig, client: reqwest::Client) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("search.endpoint required for azure backend"))?;
        let index = config
            .index
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("search.index required for azure backend"))?;
        let api_key = api_key_from_env(&config.api_key_env)?;

        Ok(Self {
            client,
            url: format!(
                "{}/indexes/{}/docs/search?api-version={}",
                endpoint.trim_end_matches('/'),
                index,
                config.api_version
            ),
            api_key,
        })
    }

    async fn search(&self, body: &Value) -> Result<Vec<SearchResult>, BackendError> {
        let request = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(body);
        let json = send_json("search", request).await?;
        parse_results(&json)
    }
}

#[async_trait]
impl SearchBackend for AzureSearchBackend {
    fn name(&self) -> &str {
        "azure"
    }

    async fn filter_search(&self, query: &FilterQuery) -> Result<Vec<SearchResult>, BackendError> {
        self.search(&filter_body(query)).await
    }

    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<SearchResult>, BackendError> {
        self.search(&hybrid_body(query)).await
    }
}

fn filter_body(query: &FilterQuery) -> Value {
    let mut body = json!({
        "search": query.keywords.as_deref().filter(|k| !k.trim().is_empty()).unwrap_or("*"),
        "select": fields::DISPLAY.join(","),
        "top": query.top,
        "count": false,
    });
    if let Some(filter) = odata_filter(&query.clauses) {
        body["filter"] = json!(filter);
    }
    if let Some(search_fields) = query.search_fields {
        body["searchFields"] = json!(search_fields.join(","));
    }
    body
}

fn hybrid_body(query: &HybridQuery) -> Value {
    let vector_queries: Vec<Value> = query
        .vector_fields
        .iter()
        .map(|field| {
            json!({
                "kind": "vector",
                "vector": query.vector,
                "fields": field,
                "k": query.k_nearest,
            })
        })
        .collect();

    json!({
        "search": query.text,
        "vectorQueries": vector_queries,
        "select": fields::DISPLAY.join(","),
        "top": query.top,
    })
}

/// Largest year an `Edm.DateTimeOffset` literal can carry.
const MAX_YEAR: i32 = 9999;

/// `search.in` delimiters, tried in order; the first one absent from every value wins.
const IN_DELIMITERS: [char; 5] = ['|', ',', ';', '~', '^'];

fn year_start(year: i32) -> String {
    format!("{:04}-01-01T00:00:00Z", year.clamp(1, MAX_YEAR))
}

/// Render clauses as a single OData filter, or `None` when unconstrained.
pub fn odata_filter(clauses: &[FilterClause]) -> Option<String> {
    let parts: Vec<String> = clauses.iter().filter_map(odata_clause).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" and "))
    }
}

fn odata_clause(clause: &FilterClause) -> Option<String> {
    match clause {
        FilterClause::YearRange { field, from, to } => {
            let mut parts = Vec::new();
            if let Some(f) = from {
                parts.push(format!("{} ge {}", field, year_start(*f)));
            }
            if let Some(t) = to {
                // Exclusive bound on the following year, unless that year is past 9999.
                match t.checked_add(1).filter(|next| *next <= MAX_YEAR) {
                    Some(next) => parts.push(format!("{} lt {}", field, year_start(next))),
                    None => parts.push(format!("{} le {:04}-12-31T23:59:59Z", field, MAX_YEAR)),
                }
            }
            (!parts.is_empty()).then(|| parts.join(" and "))
        }
        FilterClause::AnyOf { field, values } => {
            if values.is_empty() {
                return None;
            }
            let escaped: Vec<String> = values.iter().map(|v| v.replace('\'', "''")).collect();
            match IN_DELIMITERS
                .iter()
                .find(|d| !escaped.iter().any(|v| v.contains(**d)))
            {
                Some(delim) => Some(format!(
                    "{}/any(v: search.in(v, '{}', '{}'))",
                    field,
                    escaped.join(&delim.to_string()),
                    delim
                )),
                None => {
                    let alternatives = escaped
                        .iter()
                        .map(|v| format!("v eq '{}'", v))
                        .collect::<Vec<_>>()
                        .join(" or ");
                    Some(format!("{}/any(v: {})", field, alternatives))
                }
            }
        }
        FilterClause::AtLeast { field, value } => Some(format!("{} ge {}", field, value)),
        FilterClause::Between { field, low, high } => {
            let mut parts = Vec::new();
            if let Some(l) = low {
                parts.push(format!("{} ge {}", field, l));
            }
            if let Some(h) = high {
                parts.push(format!("{} le {}", field, h));
            }
            (!parts.is_empty()).then(|| parts.join(" and "))
        }
        FilterClause::Equals { field, value } => Some(format!("{} eq {}", field, value)),
    }
}

fn parse_results(json: &Value) -> Result<Vec<SearchResult>, BackendError> {
    let items = json
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| BackendError::malformed("search", "missing value array"))?;

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let Some(obj) = item.as_object() else {
            return Err(BackendError::malformed("search", "result is not an object"));
        };
        let Some(id) = obj.get(fields::ID).and_then(id_string) else {
            tracing::warn!("search result without ID skipped");
            continue;
        };
        let score = obj.get("@search.score").and_then(|s| s.as_f64()).unwrap_or(0.0);
        results.push(result_from_fields(id, score, obj));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odata_year_range_is_inclusive() {
        let clauses = vec![FilterClause::YearRange {
            field: fields::DATE_ISSUED,
            from: Some(2020),
            to: Some(2023),
        }];
        assert_eq!(
            odata_filter(&clauses).unwrap(),
            "DateIssued ge 2020-01-01T00:00:00Z and DateIssued lt 2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_odata_escapes_quotes() {
        let clauses = vec![FilterClause::AnyOf {
            field: fields::INDUSTRIES,
            values: vec!["Cote d'Ivoire".to_string(), "Banking".to_string()],
        }];
        assert_eq!(
            odata_filter(&clauses).unwrap(),
            "Industries/any(v: search.in(v, 'Cote d''Ivoire|Banking', '|'))"
        );
    }

    #[test]
    fn test_odata_years_are_zero_padded() {
        let clauses = vec![FilterClause::YearRange {
            field: fields::DATE_ISSUED,
            from: Some(999),
            to: Some(999),
        }];
        assert_eq!(
            odata_filter(&clauses).unwrap(),
            "DateIssued ge 0999-01-01T00:00:00Z and DateIssued lt 1000-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_odata_year_upper_bound_does_not_overflow() {
        let clauses = vec![FilterClause::YearRange {
            field: fields::DATE_ISSUED,
            from: None,
            to: Some(i32::MAX),
        }];
        assert_eq!(
            odata_filter(&clauses).unwrap(),
            "DateIssued le 9999-12-31T23:59:59Z"
        );

        let last_year = vec![FilterClause::YearRange {
            field: fields::DATE_ISSUED,
            from: Some(i32::MIN),
            to: Some(9999),
        }];
        assert_eq!(
            odata_filter(&last_year).unwrap(),
            "DateIssued ge 0001-01-01T00:00:00Z and DateIssued le 9999-12-31T23:59:59Z"
        );
    }

    #[test]
    fn test_odata_any_of_avoids_delimiter_in_values() {
        let clauses = vec![FilterClause::AnyOf {
            field: fields::LEGAL_ISSUES,
            values: vec!["Exports|Re-exports".to_string(), "Brokering".to_string()],
        }];
        assert_eq!(
            odata_filter(&clauses).unwrap(),
            "LegalIssues/any(v: search.in(v, 'Exports|Re-exports,Brokering', ','))"
        );
    }

    #[test]
    fn test_odata_any_of_falls_back_to_equality() {
        let clauses = vec![FilterClause::AnyOf {
            field: fields::LEGAL_ISSUES,
            values: vec!["a|b,c;d".to_string(), "e~f^g".to_string()],
        }];
        assert_eq!(
            odata_filter(&clauses).unwrap(),
            "LegalIssues/any(v: v eq 'a|b,c;d' or v eq 'e~f^g')"
        );
    }

    #[test]
    fn test_odata_joins_clauses() {
        let clauses = vec![
            FilterClause::AtLeast {
                field: fields::SETTLEMENT_AMOUNT,
                value: 1000000.0,
            },
            FilterClause::Equals {
                field: fields::PUBLISHED,
                value: true,
            },
        ];
        assert_eq!(
            odata_filter(&clauses).unwrap(),
            "SettlementAmount ge 1000000 and Published eq true"
        );
    }

    #[test]
    fn test_unconstrained_query_sends_match_all() {
        let body = filter_body(&FilterQuery {
            clauses: vec![],
            keywords: None,
            search_fields: None,
            top: 50,
        });
        assert_eq!(body["search"], "*");
        assert!(body.get("filter").is_none());
        assert_eq!(body["top"], 50);
    }

    #[test]
    fn test_hybrid_body_has_vector_query_per_field() {
        let body = hybrid_body(&HybridQuery {
            text: "banknotes".to_string(),
            vector: vec![0.1, 0.2],
            vector_fields: vec!["KeyFactsVector".to_string(), "CommentaryVector".to_string()],
            k_nearest: 30,
            top: 15,
        });
        let vqs = body["vectorQueries"].as_array().unwrap();
        assert_eq!(vqs.len(), 2);
        assert_eq!(vqs[1]["fields"], "CommentaryVector");
        assert_eq!(vqs[0]["k"], 30);
    }

    #[test]
    fn test_parse_results() {
        let body = json!({
            "value": [
                { "@search.score": 2.5, "ID": "a1", "Title": "One" },
                { "@search.score": 1.0, "Title": "no id" }
            ]
        });
        let results = parse_results(&body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "a1");
        assert_eq!(results[0].score, 2.5);
    }

    #[test]
    fn test_parse_results_missing_value() {
        assert!(parse_results(&json!({})).is_err());
    }
}
