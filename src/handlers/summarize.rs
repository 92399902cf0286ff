//! Attention summarization and image summarization.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::providers::{AttentionData, AttentionDataProvider, AttentionWindow, LlmProvider};
use crate::worker::{ContentHashCache, HandlerError, TaskContext, TaskHandler};

use super::{parse_llm_json, payload_force, payload_user_id};

/// How far back the summary window reaches.
const WINDOW_HOURS: i64 = 24;

pub struct SummarizationHandler {
    attention: Arc<dyn AttentionDataProvider>,
    llm: Arc<dyn LlmProvider>,
    cache: Arc<ContentHashCache>,
}

impl SummarizationHandler {
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
            "Summarize what the user spent their attention on in this browsing activity."
                .to_string(),
            "Respond with JSON: {\"summary\": string, \"themes\": [string]}".to_string(),
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
impl TaskHandler for SummarizationHandler {
    async fn run(&self, ctx: TaskContext) -> Result<Value, HandlerError> {
        let user_id = payload_user_id(&ctx)?;
        let force = payload_force(&ctx);
        let visit_ids: Option<Vec<String>> = ctx
            .payload
            .get("visitIds")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });

        let window = AttentionWindow::last(Duration::hours(WINDOW_HOURS));
        let mut data = self
            .attention
            .fetch_raw_attention_data(&user_id, window)
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))?;

        if let Some(ids) = &visit_ids {
            data.visits.retain(|v| ids.contains(&v.id));
            if data.is_empty() {
                return Err(HandlerError::invalid_input(
                    "none of the requested visits were found",
                ));
            }
        } else if data.is_empty() {
            return Err(HandlerError::invalid_input(format!(
                "no browsing activity recorded in the last {WINDOW_HOURS}h"
            )));
        }

        let cache_key = format!("summarization:{user_id}");
        let hash = ContentHashCache::content_hash(&data.fingerprint());
        if !force
            && let Some(cached) = self.cache.get(&cache_key, hash)
        {
            debug!(user_id = %user_id, "Summary window unchanged, reusing cached result");
            return Ok(cached);
        }

        let response = self.llm.generate(&Self::prompt(&data)).await?;
        let parsed = parse_llm_json(&response)?;

        let result = serde_json::json!({
            "summary": parsed.get("summary").cloned().unwrap_or(Value::Null),
            "themes": parsed.get("themes").cloned().unwrap_or(Value::Array(vec![])),
            "visitCount": data.visits.len(),
            "generatedAt": Utc::now(),
        });
        self.cache.put(&cache_key, hash, result.clone());
        Ok(result)
    }
}

/// Summarizes a batch of captured page images referenced by URL.
pub struct ImageSummarizationHandler {
    llm: Arc<dyn LlmProvider>,
}

impl ImageSummarizationHandler {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskHandler for ImageSummarizationHandler {
    async fn run(&self, ctx: TaskContext) -> Result<Value, HandlerError> {
        payload_user_id(&ctx)?;
        let images: Vec<&str> = ctx
            .payload
            .get("images")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if images.is_empty() {
            return Err(HandlerError::invalid_input("payload has no images"));
        }

        let mut lines = vec![
            "Summarize the content of these captured page images.".to_string(),
            "Respond with JSON: {\"summary\": string}".to_string(),
            String::new(),
        ];
        for url in &images {
            lines.push(format!("- {url}"));
        }

        let response = self.llm.generate(&lines.join("\n")).await?;
        let parsed = parse_llm_json(&response)?;

        Ok(serde_json::json!({
            "summary": parsed.get("summary").cloned().unwrap_or(Value::Null),
            "imageCount": images.len(),
            "generatedAt": Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::focus::tests::{visit, CountingLlm, StubAttention};
    use crate::task::TaskType;
    use uuid::Uuid;

    fn ctx(task_type: TaskType, payload: Value) -> TaskContext {
        TaskContext {
            task_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            task_type,
            payload,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn filters_to_requested_visits() {
        let llm = Arc::new(CountingLlm::new(
            r#"{"summary": "reading docs", "themes": ["rust"]}"#,
        ));
        let h = SummarizationHandler::new(
            Arc::new(StubAttention(vec![visit("a"), visit("b"), visit("c")])),
            llm,
            Arc::new(ContentHashCache::new()),
        );

        let result = h
            .run(ctx(
                TaskType::summarization(),
                serde_json::json!({ "userId": "u1", "visitIds": ["a", "c"] }),
            ))
            .await
            .unwrap();
        assert_eq!(result["visitCount"], 2);
        assert_eq!(result["summary"], "reading docs");
    }

    #[tokio::test]
    async fn unknown_visit_ids_are_invalid_input() {
        let llm = Arc::new(CountingLlm::new("{}"));
        let h = SummarizationHandler::new(
            Arc::new(StubAttention(vec![visit("a")])),
            llm,
            Arc::new(ContentHashCache::new()),
        );

        let err = h
            .run(ctx(
                TaskType::summarization(),
                serde_json::json!({ "userId": "u1", "visitIds": ["nope"] }),
            ))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn image_summary_requires_images() {
        let llm = Arc::new(CountingLlm::new(r#"{"summary": "a dashboard"}"#));
        let h = ImageSummarizationHandler::new(llm.clone());

        let err = h
            .run(ctx(
                TaskType::image_summarization(),
                serde_json::json!({ "userId": "u1" }),
            ))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());

        let result = h
            .run(ctx(
                TaskType::image_summarization(),
                serde_json::json!({ "userId": "u1", "images": ["https://cdn.example.com/1.png"] }),
            ))
            .await
            .unwrap();
        assert_eq!(result["imageCount"], 1);
    }
}
