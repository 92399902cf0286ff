//! Focus-area detection over the user's recent browsing window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::providers::{AttentionData, AttentionDataProvider, AttentionWindow, LlmProvider};
use crate::worker::{ContentHashCache, HandlerError, TaskContext, TaskHandler};

use super::{parse_llm_json, payload_force, payload_user_id};

/// How far back the focus window reaches.
const WINDOW_HOURS: i64 = 1;

pub struct FocusCalculationHandler {
    attention: Arc<dyn AttentionDataProvider>,
    llm: Arc<dyn LlmProvider>,
    cache: Arc<ContentHashCache>,
}

impl FocusCalculationHandler {
    pub fn new(
        attention: Arc<dyn AttentionDataProvider>,
        llm: Arc<dyn LlmProvider>,
        cache: Arc<ContentHashCache>,
    ) -> Self {
        Self {
            attention,
            llm,
            cache,
        }
    }

    fn prompt(data: &AttentionData) -> String {
        let mut lines = vec![
            "Identify the user's current focus areas from this browsing activity."
                .to_string(),
            "Respond with JSON: {\"focusAreas\": [{\"topic\": string, \"confidence\": number}]}"
                .to_string(),
            String::new(),
        ];
        for visit in &data.visits {
            lines.push(format!(
                "- {} ({}) viewed for {}s",
                visit.title, visit.url, visit.duration_secs
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl TaskHandler for FocusCalculationHandler {
    async fn run(&self, ctx: TaskContext) -> Result<Value, HandlerError> {
        let user_id = payload_user_id(&ctx)?;
        let force = payload_force(&ctx);

        let window = AttentionWindow::last(Duration::hours(WINDOW_HOURS));
        let data = self
            .attention
            .fetch_raw_attention_data(&user_id, window)
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))?;

        if data.is_empty() {
            return Err(HandlerError::invalid_input(format!(
                "no browsing activity recorded in the last {WINDOW_HOURS}h"
            )));
        }

        let cache_key = format!("focus:{user_id}");
        let hash = ContentHashCache::content_hash(&data.fingerprint());
        if !force
            && let Some(cached) = self.cache.get(&cache_key, hash)
        {
            debug!(user_id = %user_id, "Focus window unchanged, reusing cached result");
            return Ok(cached);
        }

        let response = self.llm.generate(&Self::prompt(&data)).await?;
        let parsed = parse_llm_json(&response)?;

        let result = serde_json::json!({
            "focusAreas": parsed.get("focusAreas").cloned().unwrap_or(parsed),
            "visitCount": data.visits.len(),
            "generatedAt": Utc::now(),
        });
        self.cache.put(&cache_key, hash, result.clone());
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{LlmError, ProviderError};
    use crate::providers::PageVisit;
    use crate::task::TaskType;
    use std::sync::Mutex;
    use uuid::Uuid;

    pub(crate) struct StubAttention(pub Vec<PageVisit>);

    #[async_trait]
    impl AttentionDataProvider for StubAttention {
        async fn fetch_raw_attention_data(
            &self,
            user_id: &str,
            window: AttentionWindow,
        ) -> Result<AttentionData, ProviderError> {
            Ok(AttentionData {
                user_id: user_id.to_string(),
                window,
                visits: self.0.clone(),
            })
        }
    }

    pub(crate) struct CountingLlm {
        pub response: String,
        pub calls: Mutex<usize>,
    }

    impl CountingLlm {
        pub fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CountingLlm {
        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.response.clone())
        }
    }

    pub(crate) fn visit(id: &str) -> PageVisit {
        PageVisit {
            id: id.to_string(),
            url: format!("https://example.com/{id}"),
            title: format!("Page {id}"),
            visited_at: Utc::now(),
            duration_secs: 45,
            attention_score: Some(0.8),
        }
    }

    fn ctx(payload: Value) -> TaskContext {
        TaskContext {
            task_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            task_type: TaskType::focus_calculation(),
            payload,
            retry_count: 0,
        }
    }

    fn handler(visits: Vec<PageVisit>, llm: Arc<CountingLlm>) -> FocusCalculationHandler {
        FocusCalculationHandler::new(
            Arc::new(StubAttention(visits)),
            llm,
            Arc::new(ContentHashCache::new()),
        )
    }

    #[tokio::test]
    async fn empty_activity_is_invalid_input() {
        let llm = Arc::new(CountingLlm::new("{}"));
        let h = handler(vec![], llm.clone());

        let err = h.run(ctx(serde_json::json!({ "userId": "u1" }))).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn unchanged_window_hits_cache() {
        let llm = Arc::new(CountingLlm::new(
            r#"{"focusAreas": [{"topic": "rust", "confidence": 0.9}]}"#,
        ));
        let h = handler(vec![visit("a"), visit("b")], llm.clone());

        let first = h.run(ctx(serde_json::json!({ "userId": "u1" }))).await.unwrap();
        let second = h.run(ctx(serde_json::json!({ "userId": "u1" }))).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(*llm.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn force_bypasses_cache() {
        let llm = Arc::new(CountingLlm::new(r#"{"focusAreas": []}"#));
        let h = handler(vec![visit("a")], llm.clone());

        h.run(ctx(serde_json::json!({ "userId": "u1" }))).await.unwrap();
        h.run(ctx(serde_json::json!({ "userId": "u1", "force": true })))
            .await
            .unwrap();
        assert_eq!(*llm.calls.lock().unwrap(), 2);
    }
}
