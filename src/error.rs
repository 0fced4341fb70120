//! Error taxonomy for the routing pipeline.
//!
//! External-service failures are split into transient and terminal kinds so
//! the orchestrator can apply its bounded retry policy without inspecting
//! error strings. Retrieval failures carry whatever partial results were
//! produced before the failing call.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::models::SearchResult;
use crate::orchestrator::Stage;

/// Failure talking to an external backend (LLM, embeddings, search index).
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network-level failure (connect, reset, client timeout).
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status.
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The backend answered but the payload did not have the expected shape.
    #[error("{service} returned a malformed response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },

    /// The backend is not configured (disabled provider, missing credentials).
    #[error("{0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            message: message.into(),
        }
    }

    /// HTTP 429, 5xx and network errors are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed { .. } | Self::Unavailable(_) => false,
        }
    }
}

/// Failure to classify a question.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("invalid question: {0}")]
    InvalidInput(String),

    #[error("classification backend error: {0}")]
    Backend(#[from] BackendError),

    /// The model replied with something that is not a classification object.
    #[error("unparseable classification response: {0}")]
    Unparseable(String),

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),
}

impl ClassificationError {
    /// Model output is nondeterministic, so an unparseable reply is retried
    /// like a network error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidInput(_) => false,
            Self::Backend(e) => e.is_transient(),
            Self::Unparseable(_) | Self::Timeout(_) => true,
        }
    }

    /// Short machine-readable label used in trace events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Backend(_) => "classification_backend",
            Self::Unparseable(_) => "classification_unparseable",
            Self::Timeout(_) => "classification_timeout",
        }
    }
}

/// Failure inside a retrieval strategy.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding request failed: {0}")]
    Embedding(#[source] BackendError),

    #[error("search request failed: {0}")]
    Search(#[source] BackendError),

    /// Generation failed after retrieval succeeded; the passages are kept so
    /// the caller can still show them.
    #[error("answer generation failed: {source}")]
    Generation {
        #[source]
        source: BackendError,
        passages: Vec<SearchResult>,
    },

    #[error("{stage} timed out after {budget:?}")]
    Timeout {
        stage: &'static str,
        budget: Duration,
    },
}

impl RetrievalError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedding(_) => "embedding_failure",
            Self::Search(_) => "search_failure",
            Self::Generation { .. } => "generation_failure",
            Self::Timeout { .. } => "retrieval_timeout",
        }
    }

    /// Results gathered before the failure, if any.
    pub fn into_partial_results(self) -> Vec<SearchResult> {
        match self {
            Self::Generation { passages, .. } => passages,
            _ => Vec::new(),
        }
    }
}

/// Why a request ended in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    ClassificationUnavailable,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InvalidInput => "invalid input",
            Self::ClassificationUnavailable => "classification unavailable",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Structured terminal failure returned instead of an envelope.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind} during {stage}: {reason}")]
pub struct PipelineFailure {
    pub kind: FailureKind,
    pub stage: Stage,
    pub reason: String,
    /// Classification attempts made before giving up.
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transience() {
        let status = |code| BackendError::Status {
            service: "llm",
            status: code,
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
    }

    #[test]
    fn test_classification_transience() {
        assert!(!ClassificationError::InvalidInput("blank".into()).is_transient());
        assert!(ClassificationError::Unparseable("??".into()).is_transient());
        assert!(ClassificationError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            !ClassificationError::Backend(BackendError::Unavailable("off".into())).is_transient()
        );
    }

    #[test]
    fn test_generation_failure_keeps_passages() {
        let err = RetrievalError::Generation {
            source: BackendError::malformed("llm", "no choices"),
            passages: vec![SearchResult::new("doc-1", 0.5)],
        };
        assert_eq!(err.kind(), "generation_failure");
        assert_eq!(err.into_partial_results().len(), 1);
    }
}
