//! Request lifecycle: classify, dispatch, execute, assemble.
//!
//! Each question moves through a fixed sequence of stages:
//!
//! ```text
//! Received → Classifying → Dispatching → Executing → Assembling → Completed
//!                                  └──── (clarification) ────┘
//! ```
//!
//! `Failed` is reachable from any non-terminal stage. Only classification is
//! retried, and only for transient failures. A failing strategy never falls
//! back to another route: the envelope keeps the executed route and carries a
//! `RetrievalFailure` diagnostic instead.
//!
//! Every transition records one [`SpanEvent`] on the configured
//! [`TraceSink`].

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::classifier::{Classifier, LlmClassifier};
use crate::config::{Config, TimeoutConfig};
use crate::embedding::create_embedder;
use crate::error::{ClassificationError, FailureKind, PipelineFailure, RetrievalError};
use crate::http::build_client;
use crate::index::create_backend;
use crate::llm::create_chat_model;
use crate::models::{
    AnswerEnvelope, Diagnostic, DiagnosticKind, QueryClassification, Route, StrategyOutput,
};
use crate::strategy::filter::FilterSearchStrategy;
use crate::strategy::semantic::SemanticSearchStrategy;
use crate::strategy::statistical::StatisticalStrategy;
use crate::strategy::RetrievalStrategy;
use crate::trace::{NoopSink, Outcome, SpanEvent, TraceSink, TracingSink};

/// Pipeline stage of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Classifying,
    Dispatching,
    Executing,
    Assembling,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Classifying => "classifying",
            Stage::Dispatching => "dispatching",
            Stage::Executing => "executing",
            Stage::Assembling => "assembling",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry, timeout and warning thresholds.
#[derive(Debug, Clone)]
pub struct OrchestratorPolicy {
    /// Total classification attempts, including the first.
    pub classification_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub retry_backoff: Duration,
    pub timeouts: TimeoutConfig,
    pub low_confidence_threshold: f64,
}

impl Default for OrchestratorPolicy {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

impl OrchestratorPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            classification_attempts: config.orchestrator.classification_attempts.max(1),
            retry_backoff: Duration::from_millis(config.orchestrator.retry_backoff_ms),
            timeouts: config.timeouts.clone(),
            low_confidence_threshold: config.orchestrator.low_confidence_threshold,
        }
    }

    fn backoff(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor)
    }
}

/// Routes questions to retrieval strategies and assembles the answer.
///
/// Stateless between requests; share it behind an `Arc`.
pub struct Orchestrator {
    classifier: Arc<dyn Classifier>,
    basic: Arc<dyn RetrievalStrategy>,
    advanced: Arc<dyn RetrievalStrategy>,
    statistical: Arc<dyn RetrievalStrategy>,
    policy: OrchestratorPolicy,
    sink: Arc<dyn TraceSink>,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        basic: Arc<dyn RetrievalStrategy>,
        advanced: Arc<dyn RetrievalStrategy>,
        statistical: Arc<dyn RetrievalStrategy>,
        policy: OrchestratorPolicy,
    ) -> Self {
        Self {
            classifier,
            basic,
            advanced,
            statistical,
            policy,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Build the production pipeline from configuration.
    ///
    /// One HTTP client is shared by every backend.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = build_client(config.timeouts.longest())?;

        let classifier_chat =
            create_chat_model(&config.llm, &config.llm.classifier_model, client.clone())?;
        let generation_chat =
            create_chat_model(&config.llm, &config.llm.generation_model, client.clone())?;
        let embedder = create_embedder(&config.embedding, client.clone())?;
        let backend = create_backend(&config.search, &config.retrieval, client)?;

        let classifier = Arc::new(LlmClassifier::new(
            classifier_chat,
            config.llm.classifier_temperature,
        ));
        let basic = Arc::new(FilterSearchStrategy::new(
            backend.clone(),
            config.vocabulary.clone(),
            config.retrieval.basic_top,
            config.timeouts.search(),
        ));
        let advanced = Arc::new(
            SemanticSearchStrategy::new(
                embedder,
                backend,
                generation_chat,
                config.retrieval.clone(),
                config.timeouts.clone(),
            )
            .with_temperature(config.llm.generation_temperature),
        );

        let sink: Arc<dyn TraceSink> = if config.tracing.enabled {
            Arc::new(TracingSink)
        } else {
            Arc::new(NoopSink)
        };

        Ok(Self::new(
            classifier,
            basic,
            advanced,
            Arc::new(StatisticalStrategy),
            OrchestratorPolicy::from_config(config),
        )
        .with_trace_sink(sink))
    }

    pub fn policy(&self) -> &OrchestratorPolicy {
        &self.policy
    }

    /// Run the full pipeline for one question.
    pub async fn submit_question(&self, question: &str) -> Result<AnswerEnvelope, PipelineFailure> {
        self.submit_question_until(question, std::future::pending()).await
    }

    /// Like [`submit_question`](Self::submit_question), but abandons the
    /// request as soon as `cancel` completes. In-flight backend calls are
    /// dropped.
    pub async fn submit_question_until(
        &self,
        question: &str,
        cancel: impl Future<Output = ()>,
    ) -> Result<AnswerEnvelope, PipelineFailure> {
        let tracker = Transitions::new(Uuid::new_v4(), self.sink.as_ref());

        tokio::select! {
            biased;
            _ = cancel => {
                let stage = tracker.stage();
                let attempts = tracker.attempts();
                tracker.fail("cancelled");
                tracing::info!(request_id = %tracker.request_id, %stage, "request cancelled");
                Err(PipelineFailure {
                    kind: FailureKind::Cancelled,
                    stage,
                    reason: "request cancelled by caller".to_string(),
                    attempts,
                })
            }
            result = self.run(question, &tracker) => result,
        }
    }

    /// Classify without dispatching. Same validation and retry policy as
    /// [`submit_question`](Self::submit_question).
    pub async fn classify_only(&self, question: &str) -> Result<QueryClassification, PipelineFailure> {
        let tracker = Transitions::new(Uuid::new_v4(), self.sink.as_ref());
        self.check_input(question, &tracker)?;
        tracker.advance(Stage::Classifying, Outcome::Ok, None);
        let classification = self.classify_with_retry(question, &tracker).await?;
        tracker.set_route(classification.route);
        tracker.advance(Stage::Completed, Outcome::Ok, None);
        Ok(classification)
    }

    async fn run(&self, question: &str, tracker: &Transitions<'_>) -> Result<AnswerEnvelope, PipelineFailure> {
        self.check_input(question, tracker)?;

        tracker.advance(Stage::Classifying, Outcome::Ok, None);
        let classification = self.classify_with_retry(question, tracker).await?;
        tracker.set_route(classification.route);
        tracing::debug!(
            request_id = %tracker.request_id,
            route = %classification.route,
            confidence = ?classification.confidence,
            "classified"
        );

        tracker.advance(Stage::Dispatching, Outcome::Ok, None);
        let route = classification.route;
        let strategy = match route {
            Route::BasicSearch => Some(&self.basic),
            Route::AdvancedSearch => Some(&self.advanced),
            Route::Statistical => Some(&self.statistical),
            Route::Clarification => None,
        };

        let output = match strategy {
            Some(strategy) => {
                tracker.advance(Stage::Executing, Outcome::Ok, None);
                let (output, error_kind) = self.execute(strategy.as_ref(), route, question, &classification).await;
                let outcome = if error_kind.is_some() {
                    Outcome::Degraded
                } else {
                    Outcome::Ok
                };
                tracker.advance(Stage::Assembling, outcome, error_kind);
                output
            }
            None => {
                tracker.advance(Stage::Assembling, Outcome::Ok, None);
                clarification_output(&classification)
            }
        };

        let envelope = self.assemble(tracker.request_id, question, route, classification, output);
        tracker.advance(Stage::Completed, Outcome::Ok, None);
        Ok(envelope)
    }

    fn check_input(&self, question: &str, tracker: &Transitions<'_>) -> Result<(), PipelineFailure> {
        if !question.trim().is_empty() {
            return Ok(());
        }
        tracker.fail("invalid_input");
        Err(PipelineFailure {
            kind: FailureKind::InvalidInput,
            stage: Stage::Received,
            reason: "question is empty".to_string(),
            attempts: 0,
        })
    }

    async fn classify_with_retry(
        &self,
        question: &str,
        tracker: &Transitions<'_>,
    ) -> Result<QueryClassification, PipelineFailure> {
        let max = self.policy.classification_attempts.max(1);
        let budget = self.policy.timeouts.classification();

        for attempt in 1..=max {
            tracker.set_attempts(attempt);
            let result = match tokio::time::timeout(budget, self.classifier.classify(question)).await {
                Ok(result) => result,
                Err(_) => Err(ClassificationError::Timeout(budget)),
            };

            let err = match result {
                Ok(classification) => return Ok(classification),
                Err(err) => err,
            };

            let kind = match err {
                ClassificationError::InvalidInput(_) => FailureKind::InvalidInput,
                _ => FailureKind::ClassificationUnavailable,
            };

            if err.is_transient() && attempt < max {
                let delay = self.policy.backoff(attempt);
                tracing::warn!(
                    request_id = %tracker.request_id,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "classification failed, retrying"
                );
                tracker.retry(err.kind());
                tokio::time::sleep(delay).await;
                continue;
            }

            tracing::warn!(request_id = %tracker.request_id, attempt, error = %err, "classification failed");
            tracker.fail(err.kind());
            return Err(PipelineFailure {
                kind,
                stage: Stage::Classifying,
                reason: err.to_string(),
                attempts: attempt,
            });
        }

        // Unreachable while `max >= 1`.
        tracker.fail("classification_exhausted");
        Err(PipelineFailure {
            kind: FailureKind::ClassificationUnavailable,
            stage: Stage::Classifying,
            reason: "no classification attempts were made".to_string(),
            attempts: 0,
        })
    }

    /// Run one strategy under its route budget. Failures are folded into a
    /// degraded output; the second value is the error kind, if any.
    async fn execute(
        &self,
        strategy: &dyn RetrievalStrategy,
        route: Route,
        question: &str,
        classification: &QueryClassification,
    ) -> (StrategyOutput, Option<&'static str>) {
        let budget = self.policy.timeouts.for_route(route);
        let result = match tokio::time::timeout(budget, strategy.execute(question, classification)).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout {
                stage: "execution",
                budget,
            }),
        };

        match result {
            Ok(output) => (output, None),
            Err(err) => {
                let kind = err.kind();
                tracing::warn!(%route, error = %err, "retrieval failed");
                (degraded_output(route, err), Some(kind))
            }
        }
    }

    fn assemble(
        &self,
        request_id: Uuid,
        question: &str,
        route: Route,
        classification: QueryClassification,
        output: StrategyOutput,
    ) -> AnswerEnvelope {
        let mut diagnostics = output.diagnostics;

        if let Some(confidence) = classification.confidence {
            if confidence < self.policy.low_confidence_threshold {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::LowConfidence,
                    format!(
                        "classifier confidence {:.2} is below {:.2}; the selected route may be wrong",
                        confidence, self.policy.low_confidence_threshold
                    ),
                ));
            }
        }

        AnswerEnvelope {
            request_id,
            question: question.to_string(),
            answer_text: output.answer_text,
            route,
            supporting_results: output.results,
            classification,
            diagnostics,
            applied_filter: output.applied_filter,
        }
    }
}

fn clarification_output(classification: &QueryClassification) -> StrategyOutput {
    let answer_text = match &classification.clarification_question {
        Some(q) => q.clone(),
        None if !classification.rationale.is_empty() => format!(
            "Could you clarify your question? {}",
            classification.rationale
        ),
        None => "Could you add more detail to your question, for example a sanctions program or time period?"
            .to_string(),
    };
    StrategyOutput {
        answer_text,
        ..Default::default()
    }
}

fn degraded_output(route: Route, err: RetrievalError) -> StrategyOutput {
    let message = err.to_string();
    let results = err.into_partial_results();

    let mut answer_text = format!(
        "The {} search could not be completed ({}). Please try again or rephrase the question.",
        route, message
    );
    if !results.is_empty() {
        answer_text.push_str(" The documents retrieved before the failure are listed without a generated answer.");
    }

    StrategyOutput {
        answer_text,
        results,
        diagnostics: vec![Diagnostic::new(DiagnosticKind::RetrievalFailure, message)],
        applied_filter: None,
    }
}

/// Current stage of one request plus the span bookkeeping for it.
struct Transitions<'a> {
    request_id: Uuid,
    sink: &'a dyn TraceSink,
    // Borrowed across awaits by both `select!` branches, so it must be Sync
    // for the request future to stay Send. Locked only inside `with_state`.
    state: Mutex<TransitionState>,
}

struct TransitionState {
    stage: Stage,
    entered: Instant,
    route: Option<Route>,
    attempts: u32,
}

impl<'a> Transitions<'a> {
    fn new(request_id: Uuid, sink: &'a dyn TraceSink) -> Self {
        Self {
            request_id,
            sink,
            state: Mutex::new(TransitionState {
                stage: Stage::Received,
                entered: Instant::now(),
                route: None,
                attempts: 0,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TransitionState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn stage(&self) -> Stage {
        self.with_state(|s| s.stage)
    }

    fn attempts(&self) -> u32 {
        self.with_state(|s| s.attempts)
    }

    fn set_attempts(&self, attempts: u32) {
        self.with_state(|s| s.attempts = attempts);
    }

    fn set_route(&self, route: Route) {
        self.with_state(|s| s.route = Some(route));
    }

    /// Close the current stage with `outcome` and enter `next`.
    fn advance(&self, next: Stage, outcome: Outcome, error_kind: Option<&'static str>) {
        let event = self.with_state(|s| {
            let event = SpanEvent {
                request_id: self.request_id,
                stage: s.stage,
                route: s.route,
                duration: s.entered.elapsed(),
                outcome,
                error_kind,
            };
            s.stage = next;
            s.entered = Instant::now();
            event
        });
        self.emit(&event);
    }

    /// Record a failed attempt without leaving the current stage.
    fn retry(&self, error_kind: &'static str) {
        let event = self.with_state(|s| {
            let event = SpanEvent {
                request_id: self.request_id,
                stage: s.stage,
                route: s.route,
                duration: s.entered.elapsed(),
                outcome: Outcome::Retry,
                error_kind: Some(error_kind),
            };
            s.entered = Instant::now();
            event
        });
        self.emit(&event);
    }

    fn fail(&self, error_kind: &'static str) {
        self.advance(Stage::Failed, Outcome::Failed, Some(error_kind));
    }

    fn emit(&self, event: &SpanEvent) {
        if let Err(e) = self.sink.record(event) {
            tracing::warn!(request_id = %self.request_id, error = %e, "trace sink failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = OrchestratorPolicy {
            retry_backoff: Duration::from_millis(500),
            ..OrchestratorPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_request_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}

        let orchestrator = Orchestrator::from_config(&Config::minimal()).unwrap();
        let answer = orchestrator.submit_question("What is facilitation?");
        assert_send(&answer);
        let cancellable = orchestrator.submit_question_until("What is facilitation?", async {});
        assert_send(&cancellable);
        let classify = orchestrator.classify_only("What is facilitation?");
        assert_send(&classify);
    }

    #[test]
    fn test_clarification_prefers_question() {
        let c = QueryClassification::new(Route::Clarification, "too vague")
            .with_clarification("Which program?");
        assert_eq!(clarification_output(&c).answer_text, "Which program?");

        let c = QueryClassification::new(Route::Clarification, "too vague");
        assert!(clarification_output(&c).answer_text.contains("too vague"));
    }

    #[test]
    fn test_degraded_output_keeps_partial_results() {
        let err = RetrievalError::Generation {
            source: crate::error::BackendError::malformed("llm", "empty"),
            passages: vec![crate::models::SearchResult::new("d1", 0.9)],
        };
        let out = degraded_output(Route::AdvancedSearch, err);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::RetrievalFailure);
        assert!(out.answer_text.contains("advanced_search"));
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Assembling.to_string(), "assembling");
        assert_eq!(serde_json::to_value(Stage::Failed).unwrap(), "failed");
    }
}
