//! Quiz generation from the user's recent browsing activity.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;

use crate::providers::{AttentionData, AttentionDataProvider, AttentionWindow, LlmProvider};
use crate::worker::{HandlerError, TaskContext, TaskHandler};

use super::{parse_llm_json, payload_user_id};

/// How far back quiz material reaches.
const WINDOW_HOURS: i64 = 24;
/// Fewer visits than this cannot yield a meaningful quiz.
const MIN_VISITS: usize = 3;
const DEFAULT_QUESTION_COUNT: u64 = 5;

pub struct QuizGenerationHandler {
    attention: Arc<dyn AttentionDataProvider>,
    llm: Arc<dyn LlmProvider>,
}

impl QuizGenerationHandler {
    pub fn new(attention: Arc<dyn AttentionDataProvider>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { attention, llm }
    }

    fn prompt(data: &AttentionData, question_count: u64) -> String {
        let mut lines = vec![
            format!(
                "Write {question_count} multiple-choice questions testing recall of the \
                 content the user read today."
            ),
            "Respond with JSON: {\"questions\": [{\"question\": string, \"choices\": \
             [string], \"answerIndex\": number}]}"
                .to_string(),
            String::new(),
        ];
        for visit in &data.visits {
            lines.push(format!("- {} ({})", visit.title, visit.url));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl TaskHandler for QuizGenerationHandler {
    async fn run(&self, ctx: TaskContext) -> Result<Value, HandlerError> {
        let user_id = payload_user_id(&ctx)?;
        let question_count = ctx
            .payload
            .get("questionCount")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_QUESTION_COUNT);

        let window = AttentionWindow::last(Duration::hours(WINDOW_HOURS));
        let data = self
            .attention
            .fetch_raw_attention_data(&user_id, window)
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))?;

        if data.visits.len() < MIN_VISITS {
            return Err(HandlerError::invalid_input(
                "not enough activity data to generate a quiz",
            ));
        }

        let response = self.llm.generate(&Self::prompt(&data, question_count)).await?;
        let parsed = parse_llm_json(&response)?;

        Ok(serde_json::json!({
            "questions": parsed.get("questions").cloned().unwrap_or(parsed),
            "sourceVisitCount": data.visits.len(),
            "generatedAt": Utc::now(),
        }))
    }
}
