//! OpenAI-compatible HTTP transport for the planner.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::PlannerConfig;
use crate::errors::{UiPilotError, UiPilotResult};
use crate::planner::transport::PlannerTransport;
use crate::planner::types::{ConversationTurn, TurnContent, TurnRole};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

pub struct OpenAiCompatibleTransport {
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
    telemetry: Arc<dyn TelemetrySink>,
}

impl OpenAiCompatibleTransport {
    pub fn new(cfg: &PlannerConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            api_base: cfg.api_base.clone(),
            api_key: cfg.resolve_api_key().unwrap_or_default(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            client: reqwest::Client::new(),
            telemetry,
        }
    }

    fn turn_to_message(turn: &ConversationTurn) -> serde_json::Value {
        let role = match turn.role {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        };
        // Plain string content for text-only turns; the parts array is only
        // needed when an image rides along.
        let text_only = turn
            .content
            .iter()
            .all(|c| matches!(c, TurnContent::Text { .. }));
        if text_only {
            let text: String = turn
                .content
                .iter()
                .map(|c| match c {
                    TurnContent::Text { text } => text.as_str(),
                    TurnContent::Image { .. } => "",
                })
                .collect();
            return serde_json::json!({ "role": role, "content": text });
        }
        let parts: Vec<serde_json::Value> = turn
            .content
            .iter()
            .map(|c| match c {
                TurnContent::Text { text } => {
                    serde_json::json!({ "type": "text", "text": text })
                }
                TurnContent::Image { base64 } => serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/png;base64,{base64}") },
                }),
            })
            .collect();
        serde_json::json!({ "role": role, "content": parts })
    }
}

#[async_trait]
impl PlannerTransport for OpenAiCompatibleTransport {
    fn ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(
        &self,
        turns: &[ConversationTurn],
        instructions: &str,
    ) -> UiPilotResult<String> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": instructions,
        })];
        messages.extend(turns.iter().map(Self::turn_to_message));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": 0.1,
        });

        let upload_bytes = instructions.len()
            + turns.iter().map(ConversationTurn::payload_bytes).sum::<usize>();
        let with_screenshot = turns
            .iter()
            .any(|t| t.content.iter().any(|c| matches!(c, TurnContent::Image { .. })));

        tracing::debug!(
            model = %self.model,
            turns = turns.len(),
            upload_bytes,
            with_screenshot,
            "sending planner request"
        );
        tracing::trace!(
            body = %{
                // Sanitize base64 images only for logging; the real request
                // keeps the payloads.
                let mut log_body = body.clone();
                if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
                    for msg in msgs {
                        if let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) {
                            for part in parts {
                                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                                    if let Some(url) = part
                                        .get_mut("image_url")
                                        .and_then(|iu| iu.get_mut("url"))
                                    {
                                        *url = serde_json::Value::String(
                                            "<omitted_base64_image>".to_string(),
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
                serde_json::to_string(&log_body).unwrap_or_default()
            },
            "request body (sanitized, base64 omitted)"
        );

        let started = Instant::now();
        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(UiPilotError::Planner(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.telemetry.record(TelemetryEvent::PlannerRequest {
            upload_bytes,
            latency_ms,
            with_screenshot,
        });

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        tracing::info!(content_len = content.len(), latency_ms, "planner response received");
        if content.is_empty() {
            return Err(UiPilotError::Planner("empty completion content".into()));
        }
        Ok(content)
    }
}
