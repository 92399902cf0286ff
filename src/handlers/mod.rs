//! Built-in task handlers.
//!
//! Thin adapters from queue payloads to the provider seams. All domain
//! smarts live behind `LlmProvider` and `AttentionDataProvider`; handlers
//! validate input, consult the content hash cache, and shape results.

pub mod focus;
pub mod quiz;
pub mod summarize;

use std::sync::Arc;

use serde_json::Value;

use crate::providers::{AttentionDataProvider, LlmProvider};
use crate::task::TaskType;
use crate::worker::{ContentHashCache, HandlerError, HandlerRegistry, TaskContext};

pub use focus::FocusCalculationHandler;
pub use quiz::QuizGenerationHandler;
pub use summarize::{ImageSummarizationHandler, SummarizationHandler};

/// Wire all four built-in handlers into a registry with a shared cache.
pub fn register_builtin_handlers(
    registry: &HandlerRegistry,
    attention: Arc<dyn AttentionDataProvider>,
    llm: Arc<dyn LlmProvider>,
    cache: Arc<ContentHashCache>,
) {
    registry.register(
        TaskType::focus_calculation(),
        Arc::new(FocusCalculationHandler::new(
            attention.clone(),
            llm.clone(),
            cache.clone(),
        )),
    );
    registry.register(
        TaskType::quiz_generation(),
        Arc::new(QuizGenerationHandler::new(attention.clone(), llm.clone())),
    );
    registry.register(
        TaskType::summarization(),
        Arc::new(SummarizationHandler::new(attention, llm.clone(), cache)),
    );
    registry.register(
        TaskType::image_summarization(),
        Arc::new(ImageSummarizationHandler::new(llm)),
    );
}

/// The `userId` every handler payload carries. Falls back to the task's
/// own user when the payload omits it.
fn payload_user_id(ctx: &TaskContext) -> Result<String, HandlerError> {
    match ctx.payload.get("userId").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        Some(_) => Err(HandlerError::invalid_input("payload userId is empty")),
        None if !ctx.user_id.is_empty() => Ok(ctx.user_id.clone()),
        None => Err(HandlerError::invalid_input("payload missing userId")),
    }
}

fn payload_force(ctx: &TaskContext) -> bool {
    ctx.payload
        .get("force")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Parse a model response as JSON, tolerating a markdown code fence.
/// A malformed response is transient: the next attempt may produce
/// valid output.
fn parse_llm_json(raw: &str) -> Result<Value, HandlerError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim())
        .map_err(|e| HandlerError::transient(format!("model returned invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx(payload: Value) -> TaskContext {
        TaskContext {
            task_id: Uuid::new_v4(),
            user_id: "fallback-user".to_string(),
            task_type: TaskType::focus_calculation(),
            payload,
            retry_count: 0,
        }
    }

    #[test]
    fn user_id_prefers_payload_over_task() {
        let c = ctx(serde_json::json!({ "userId": "u9" }));
        assert_eq!(payload_user_id(&c).unwrap(), "u9");

        let c = ctx(serde_json::json!({}));
        assert_eq!(payload_user_id(&c).unwrap(), "fallback-user");
    }

    #[test]
    fn parse_llm_json_strips_code_fence() {
        let fenced = "```json\n{\"ok\": true}\n```";
        assert_eq!(
            parse_llm_json(fenced).unwrap(),
            serde_json::json!({ "ok": true })
        );
        assert!(parse_llm_json("not json").is_err());
    }
}
