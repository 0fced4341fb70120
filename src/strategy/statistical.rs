use async_trait::async_trait;

use crate::error::RetrievalError;
use crate::models::{Diagnostic, DiagnosticKind, QueryClassification, Route, StrategyOutput};

use super::RetrievalStrategy;

pub const UNSUPPORTED_ANSWER: &str = "I apologize, but I cannot process statistical queries yet. \
This feature is under development. Please try asking about specific documents, cases, or legal concepts instead.";

/// Placeholder for aggregate questions. Makes no external calls.
pub struct StatisticalStrategy;

#[async_trait]
impl RetrievalStrategy for StatisticalStrategy {
    fn route(&self) -> Route {
        Route::Statistical
    }

    async fn execute(
        &self,
        _question: &str,
        _classification: &QueryClassification,
    ) -> Result<StrategyOutput, RetrievalError> {
        Ok(StrategyOutput {
            answer_text: UNSUPPORTED_ANSWER.to_string(),
            results: Vec::new(),
            diagnostics: vec![Diagnostic::new(
                DiagnosticKind::UnsupportedRoute,
                "statistical queries are not supported yet; rephrase as a document search \
                 (e.g. \"Show me penalties over $1 million in 2023\")",
            )],
            applied_filter: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_answer_and_diagnostic() {
        let c = QueryClassification::new(Route::Statistical, "counts");
        let out = StatisticalStrategy
            .execute("How many violations were there in 2023?", &c)
            .await
            .unwrap();
        assert!(out.results.is_empty());
        assert_eq!(out.answer_text, UNSUPPORTED_ANSWER);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::UnsupportedRoute);
    }
}
