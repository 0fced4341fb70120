//! Semantic search with a grounded, generated answer.
//!
//! Embed the question, run one hybrid query across the configured vector
//! fields, keep the best `max_passages` results in rank order, and ask the
//! generation model to answer from those passages only.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::index::{HybridQuery, SearchBackend};
use crate::llm::{ChatModel, ChatRequest};
use crate::models::{Diagnostic, DiagnosticKind, QueryClassification, Route, StrategyOutput};
use crate::prompts::{grounded_answer_message, GROUNDED_ANSWER_PROMPT};

use super::{timed, RetrievalStrategy};

pub struct SemanticSearchStrategy {
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn SearchBackend>,
    chat: Arc<dyn ChatModel>,
    retrieval: RetrievalConfig,
    timeouts: TimeoutConfig,
    temperature: Option<f32>,
}

impl SemanticSearchStrategy {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn SearchBackend>,
        chat: Arc<dyn ChatModel>,
        retrieval: RetrievalConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            embedder,
            backend,
            chat,
            retrieval,
            timeouts,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Retrieve, then generate. Returns the answer and the passages it was
    /// grounded on.
    pub async fn search(&self, question: &str) -> Result<StrategyOutput, RetrievalError> {
        let vector = timed(
            "embedding",
            self.timeouts.embedding(),
            self.embedder.embed_query(question),
            RetrievalError::Embedding,
        )
        .await?;

        let query = HybridQuery::new(question, vector, &self.retrieval);
        let mut passages = timed(
            "search",
            self.timeouts.search(),
            self.backend.hybrid_search(&query),
            RetrievalError::Search,
        )
        .await?;
        passages.truncate(self.retrieval.max_passages);

        tracing::debug!(
            passages = passages.len(),
            embedder = self.embedder.model_name(),
            "hybrid retrieval complete"
        );

        let mut diagnostics = Vec::new();
        if passages.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::NoResults,
                "hybrid search returned no passages",
            ));
        }

        let user = grounded_answer_message(question, &passages);
        let request = ChatRequest {
            system: GROUNDED_ANSWER_PROMPT,
            user: &user,
            temperature: self.temperature,
            json_mode: false,
        };

        let answer_text = match tokio::time::timeout(self.timeouts.generation(), self.chat.complete(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(source)) => return Err(RetrievalError::Generation { source, passages }),
            Err(_) => {
                return Err(RetrievalError::Timeout {
                    stage: "generation",
                    budget: self.timeouts.generation(),
                })
            }
        };

        Ok(StrategyOutput {
            answer_text,
            results: passages,
            diagnostics,
            applied_filter: Some(format!(
                "hybrid query over {} (k={}, top={})",
                query.vector_fields.join(", "),
                query.k_nearest,
                query.top
            )),
        })
    }
}

#[async_trait]
impl RetrievalStrategy for SemanticSearchStrategy {
    fn route(&self) -> Route {
        Route::AdvancedSearch
    }

    async fn execute(
        &self,
        question: &str,
        _classification: &QueryClassification,
    ) -> Result<StrategyOutput, RetrievalError> {
        self.search(question).await
    }
}
