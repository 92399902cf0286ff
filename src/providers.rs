//! External collaborator seams: the LLM backend, the attention-data
//! store, and the shapes they exchange.
//!
//! Handlers depend on these traits only. Production wiring injects real
//! adapters; tests inject stubs.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, ProviderError};

/// Text generation backend used by the built-in handlers.
///
/// Failures are transient by default; the handler decides whether a
/// particular response means the *input* was the problem.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Flush any buffered or batched requests. A no-op for most backends.
    async fn flush(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

/// Half-open time window over a user's browsing activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AttentionWindow {
    /// The trailing window ending now.
    pub fn last(span: Duration) -> Self {
        let end = Utc::now();
        Self {
            start: end - span,
            end,
        }
    }
}

/// One recorded page visit with its measured attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub id: String,
    pub url: String,
    pub title: String,
    pub visited_at: DateTime<Utc>,
    pub duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_score: Option<f64>,
}

/// Raw attention data for one user over one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionData {
    pub user_id: String,
    pub window: AttentionWindow,
    pub visits: Vec<PageVisit>,
}

impl AttentionData {
    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }

    /// Stable textual form of the data window, used for content hashing.
    /// Two fetches over an unchanged set of visits produce the same
    /// fingerprint even if the window edges moved.
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = self
            .visits
            .iter()
            .map(|v| format!("{}|{}|{}", v.id, v.visited_at.timestamp(), v.duration_secs))
            .collect();
        parts.sort();
        parts.join("\n")
    }
}

/// Read-only access to the product's attention records.
#[async_trait]
pub trait AttentionDataProvider: Send + Sync {
    async fn fetch_raw_attention_data(
        &self,
        user_id: &str,
        window: AttentionWindow,
    ) -> Result<AttentionData, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(id: &str, at: DateTime<Utc>, secs: u64) -> PageVisit {
        PageVisit {
            id: id.to_string(),
            url: format!("https://example.com/{id}"),
            title: id.to_string(),
            visited_at: at,
            duration_secs: secs,
            attention_score: None,
        }
    }

    #[test]
    fn fingerprint_is_order_insensitive() {
        let now = Utc::now();
        let window = AttentionWindow::last(Duration::hours(1));
        let a = AttentionData {
            user_id: "u1".to_string(),
            window,
            visits: vec![visit("a", now, 10), visit("b", now, 20)],
        };
        let b = AttentionData {
            user_id: "u1".to_string(),
            window,
            visits: vec![visit("b", now, 20), visit("a", now, 10)],
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let now = Utc::now();
        let window = AttentionWindow::last(Duration::hours(1));
        let a = AttentionData {
            user_id: "u1".to_string(),
            window,
            visits: vec![visit("a", now, 10)],
        };
        let b = AttentionData {
            user_id: "u1".to_string(),
            window,
            visits: vec![visit("a", now, 25)],
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
