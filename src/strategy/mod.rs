//! Retrieval strategies, one per executable route.
//!
//! | Route | Strategy |
//! |-------|----------|
//! | `basic_search` | [`filter::FilterSearchStrategy`] |
//! | `advanced_search` | [`semantic::SemanticSearchStrategy`] |
//! | `statistical` | [`statistical::StatisticalStrategy`] |
//!
//! Strategies never retry and never fall back to another route. Each
//! external call runs under its own budget from `[timeouts]`.

pub mod filter;
pub mod semantic;
pub mod statistical;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RetrievalError;
use crate::models::{QueryClassification, Route, StrategyOutput};

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    /// The route this strategy serves.
    fn route(&self) -> Route;

    async fn execute(
        &self,
        question: &str,
        classification: &QueryClassification,
    ) -> Result<StrategyOutput, RetrievalError>;
}

/// Await `fut` under `budget`, mapping its error with `map_err`.
pub(crate) async fn timed<T, E>(
    stage: &'static str,
    budget: Duration,
    fut: impl Future<Output = Result<T, E>>,
    map_err: impl FnOnce(E) -> RetrievalError,
) -> Result<T, RetrievalError> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result.map_err(map_err),
        Err(_) => Err(RetrievalError::Timeout { stage, budget }),
    }
}
