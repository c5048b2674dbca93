//! Completion provider
//!
//! The model behind the agent, treated as an opaque capability: given a
//! system prompt, conversation history and tool catalog it returns a turn
//! that is either plain text or one or more tool-invocation requests.
//! `ClaudeClient` is the concrete Anthropic Messages implementation; tests
//! substitute scripted providers through the same trait.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::conversation::{ContentBlock, Turn};
use crate::error::CompletionError;
use crate::protocol::ToolDefinition;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

impl StopReason {
    fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("end_turn") => Self::EndTurn,
            Some("tool_use") => Self::ToolUse,
            Some("max_tokens") => Self::MaxTokens,
            _ => Self::Other,
        }
    }
}

/// One model turn: content blocks plus the stop reason.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl ModelTurn {
    /// Concatenated text of the turn.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Does this turn carry tool-invocation requests the agent must run?
    pub fn requests_tools(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

/// External completion capability.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Result<ModelTurn, CompletionError>;

    /// Streaming variant: delivers raw text deltas through `deltas` while
    /// producing the same final turn as `complete`. The default forwards
    /// the whole text as one delta, which keeps non-incremental providers
    /// (and test doubles) behaviorally identical to the blocking path.
    async fn complete_stream(
        &self,
        system: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        max_tokens: u32,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<ModelTurn, CompletionError> {
        let turn = self.complete(system, conversation, tools, max_tokens).await?;
        let text = turn.text();
        if !text.is_empty() {
            let _ = deltas.send(text);
        }
        Ok(turn)
    }
}

/// Anthropic Messages API client.
#[derive(Clone)]
pub struct ClaudeClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl ClaudeClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Option<Self> {
        config
            .anthropic_api_key
            .as_deref()
            .map(|key| Self::new(key, &config.model))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        system: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        max_tokens: u32,
        stream: bool,
    ) -> Result<reqwest::Response, CompletionError> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: conversation,
            tools,
            stream: stream.then_some(true),
        };

        debug!(
            "calling completion API: model={}, turns={}, tools={}",
            self.model,
            conversation.len(),
            tools.len()
        );

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for ClaudeClient {
    async fn complete(
        &self,
        system: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Result<ModelTurn, CompletionError> {
        let response = self.send(system, conversation, tools, max_tokens, false).await?;

        let parsed: MessageResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        info!(
            "completion: stop_reason={:?}, in={}, out={}",
            parsed.stop_reason, parsed.usage.input_tokens, parsed.usage.output_tokens
        );

        Ok(ModelTurn {
            content: parsed.content,
            stop_reason: StopReason::from_wire(parsed.stop_reason.as_deref()),
        })
    }

    async fn complete_stream(
        &self,
        system: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        max_tokens: u32,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<ModelTurn, CompletionError> {
        let response = self.send(system, conversation, tools, max_tokens, true).await?;

        let mut assembler = StreamAssembler::new();
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let event: serde_json::Value = serde_json::from_str(data)
                    .map_err(|e| CompletionError::Stream(format!("bad event payload: {e}")))?;
                if assembler.apply(&event, &deltas)? {
                    return assembler.finish();
                }
            }
        }

        // message_stop never arrived; return what was assembled.
        warn!("completion stream ended without message_stop");
        assembler.finish()
    }
}

/// Rebuilds a full model turn from server-sent stream events, forwarding
/// text deltas as they arrive and accumulating tool-use input JSON until
/// each block closes.
struct StreamAssembler {
    blocks: Vec<ContentBlock>,
    partial_json: Vec<String>,
    stop_reason: Option<String>,
}

impl StreamAssembler {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            partial_json: Vec::new(),
            stop_reason: None,
        }
    }

    /// Apply one stream event. Returns true once the message is complete.
    fn apply(
        &mut self,
        event: &serde_json::Value,
        deltas: &mpsc::UnboundedSender<String>,
    ) -> Result<bool, CompletionError> {
        match event["type"].as_str() {
            Some("content_block_start") => {
                let block: ContentBlock =
                    serde_json::from_value(event["content_block"].clone())
                        .map_err(|e| CompletionError::Stream(format!("bad content block: {e}")))?;
                self.blocks.push(block);
                self.partial_json.push(String::new());
            }
            Some("content_block_delta") => {
                let index = event["index"].as_u64().unwrap_or_default() as usize;
                match event["delta"]["type"].as_str() {
                    Some("text_delta") => {
                        let delta = event["delta"]["text"].as_str().unwrap_or_default();
                        if let Some(ContentBlock::Text { text }) = self.blocks.get_mut(index) {
                            text.push_str(delta);
                        }
                        if !delta.is_empty() {
                            let _ = deltas.send(delta.to_string());
                        }
                    }
                    Some("input_json_delta") => {
                        let delta = event["delta"]["partial_json"].as_str().unwrap_or_default();
                        if let Some(partial) = self.partial_json.get_mut(index) {
                            partial.push_str(delta);
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                let index = event["index"].as_u64().unwrap_or_default() as usize;
                if let (Some(ContentBlock::ToolUse { input, .. }), Some(partial)) =
                    (self.blocks.get_mut(index), self.partial_json.get(index))
                {
                    if !partial.is_empty() {
                        *input = serde_json::from_str(partial).map_err(|e| {
                            CompletionError::Stream(format!("bad tool input JSON: {e}"))
                        })?;
                    }
                }
            }
            Some("message_delta") => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
            }
            Some("message_stop") => return Ok(true),
            Some("error") => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error");
                return Err(CompletionError::Stream(message.to_string()));
            }
            _ => {}
        }
        Ok(false)
    }

    fn finish(self) -> Result<ModelTurn, CompletionError> {
        Ok(ModelTurn {
            content: self.blocks,
            stop_reason: StopReason::from_wire(self.stop_reason.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(StopReason::from_wire(Some("end_turn")), StopReason::EndTurn);
        assert_eq!(StopReason::from_wire(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(StopReason::from_wire(None), StopReason::Other);
    }

    #[test]
    fn model_turn_detects_tool_requests() {
        let plain = ModelTurn {
            content: vec![ContentBlock::text("done")],
            stop_reason: StopReason::EndTurn,
        };
        assert!(!plain.requests_tools());

        let with_tool = ModelTurn {
            content: vec![
                ContentBlock::text("let me check"),
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "search_todos".into(),
                    input: json!({"query": "dentist"}),
                },
            ],
            stop_reason: StopReason::ToolUse,
        };
        assert!(with_tool.requests_tools());
        assert_eq!(with_tool.text(), "let me check");
    }

    #[test]
    fn assembler_rebuilds_text_and_tool_input() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut assembler = StreamAssembler::new();

        let events = [
            json!({"type": "content_block_start", "index": 0,
                   "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "text_delta", "text": "Searching"}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "text_delta", "text": " now"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1,
                   "content_block": {"type": "tool_use", "id": "t1",
                                     "name": "search_todos", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1,
                   "delta": {"type": "input_json_delta", "partial_json": "{\"que"}}),
            json!({"type": "content_block_delta", "index": 1,
                   "delta": {"type": "input_json_delta", "partial_json": "ry\": \"x\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
        ];
        for event in &events {
            assert!(!assembler.apply(event, &tx).unwrap());
        }
        assert!(assembler
            .apply(&json!({"type": "message_stop"}), &tx)
            .unwrap());

        let turn = assembler.finish().unwrap();
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        assert_eq!(turn.text(), "Searching now");
        match &turn.content[1] {
            ContentBlock::ToolUse { input, .. } => assert_eq!(input["query"], "x"),
            other => panic!("expected tool_use, got {other:?}"),
        }

        assert_eq!(rx.try_recv().unwrap(), "Searching");
        assert_eq!(rx.try_recv().unwrap(), " now");
    }

    #[test]
    fn assembler_surfaces_stream_errors() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut assembler = StreamAssembler::new();
        let err = assembler
            .apply(
                &json!({"type": "error", "error": {"message": "overloaded"}}),
                &tx,
            )
            .unwrap_err();
        assert!(matches!(err, CompletionError::Stream(m) if m == "overloaded"));
    }
}
