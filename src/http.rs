//! Shared HTTP plumbing for the external backends.
//!
//! One [`reqwest::Client`] is built at startup and cloned into every backend
//! (clones share the connection pool). [`send_json`] maps transport and
//! status failures onto [`BackendError`] so transience is decided in one
//! place:
//! - HTTP 429 (rate limited) and 5xx (server error) → transient
//! - HTTP 4xx (client error, not 429) → terminal
//! - Network errors → transient

use std::time::Duration;

use reqwest::RequestBuilder;
use serde_json::Value;

use crate::error::BackendError;

/// Build the process-wide HTTP client.
///
/// `ceiling` is a hard upper bound for any single request; per-call budgets
/// are enforced separately by the caller with `tokio::time::timeout`.
pub fn build_client(ceiling: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(ceiling)
        .user_agent(concat!("esearch/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Send a JSON request and decode a JSON response body.
pub async fn send_json(service: &'static str, request: RequestBuilder) -> Result<Value, BackendError> {
    let response = request
        .header("Content-Type", "application/json")
        .send()
        .await
        .map_err(|source| BackendError::Transport { service, source })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            service,
            status: status.as_u16(),
            body: truncate(&body, 500),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| BackendError::malformed(service, e.to_string()))
}

/// Resolve an API key from the environment at construction time.
pub fn api_key_from_env(var: &str) -> anyhow::Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => anyhow::bail!("{} environment variable not set", var),
    }
}

/// Truncate to at most `max` characters, on a char boundary.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_multibyte() {
        let t = truncate("ééééé", 2);
        assert_eq!(t, "éé…");
    }

    #[test]
    fn test_missing_key_names_variable() {
        let err = api_key_from_env("ESEARCH_TEST_KEY_THAT_IS_NOT_SET").unwrap_err();
        assert!(err.to_string().contains("ESEARCH_TEST_KEY_THAT_IS_NOT_SET"));
    }
}
