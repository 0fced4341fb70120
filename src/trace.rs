//! Span events for pipeline observability.
//!
//! The orchestrator records one [`SpanEvent`] per state transition. Sinks
//! are best-effort: a failing sink is logged and otherwise ignored.

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::models::Route;
use crate::orchestrator::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Retry,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanEvent {
    pub request_id: Uuid,
    pub stage: Stage,
    pub route: Option<Route>,
    /// Time spent in `stage`.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub outcome: Outcome,
    pub error_kind: Option<&'static str>,
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: &SpanEvent) -> anyhow::Result<()>;
}

/// Emits span events as structured `tracing` events.
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, event: &SpanEvent) -> anyhow::Result<()> {
        tracing::info!(
            target: "enforcement_search::trace",
            request_id = %event.request_id,
            stage = %event.stage,
            route = event.route.map(|r| r.as_str()).unwrap_or("-"),
            duration_ms = event.duration.as_millis() as u64,
            outcome = ?event.outcome,
            error_kind = event.error_kind.unwrap_or("-"),
            "span"
        );
        Ok(())
    }
}

/// Discards every event; used when `tracing.enabled = false`.
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&self, _event: &SpanEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_event_serializes_duration_as_millis() {
        let event = SpanEvent {
            request_id: Uuid::nil(),
            stage: Stage::Classifying,
            route: None,
            duration: Duration::from_millis(1500),
            outcome: Outcome::Retry,
            error_kind: Some("classification_timeout"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["outcome"], "retry");
        assert_eq!(json["stage"], "classifying");
    }

    #[test]
    fn test_builtin_sinks_never_fail() {
        let event = SpanEvent {
            request_id: Uuid::new_v4(),
            stage: Stage::Completed,
            route: Some(Route::BasicSearch),
            duration: Duration::ZERO,
            outcome: Outcome::Ok,
            error_kind: None,
        };
        assert!(TracingSink.record(&event).is_ok());
        assert!(NoopSink.record(&event).is_ok());
    }
}
