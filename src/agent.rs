//! Pico agent
//!
//! The agentic loop: invoke the model, execute any requested operations
//! through the registry, fold the results back into the conversation, and
//! repeat until the model stops asking for tools or the iteration cap is
//! hit. Tool failures are reported back into the conversation so the model
//! can recover; only completion-provider failures abort the session.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Local;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use crate::completion::{CompletionProvider, ModelTurn};
use crate::conversation::{ContentBlock, Turn};
use crate::error::CompletionError;
use crate::protocol::{Registry, ToolDefinition};

/// Hard cap on tool-use round-trips per chat call. Hitting it is a defined
/// terminal state, not an error: the caller gets the best partial answer.
pub const MAX_ITERATIONS: usize = 10;

/// Static instruction block. Computed once; the current date is appended
/// fresh on every call.
const BASE_SYSTEM_PROMPT: &str = "\
You are Pico, a personalized assistant for note-taking and task management.

**Core capabilities (via operations):**
- Search, create, and update notes
- Manage todos (create, update, complete, search, reorder)
- Learn user preferences over time

**Rules:**
1. **Always act through operations** - never claim you did something without calling the matching operation
2. **Search before modifying** - use search_todos/search_notes to find the record, take its id from the results, then call update/complete with that id
3. **Todos need due dates** - if the user has not given one, ask before creating the todo
4. **Update preferences** - after completing meaningful actions, call update_preferences to remember patterns

Be concise and use Markdown formatting.";

/// Advisory map of side-effecting actions taken during one chat call:
/// derived key (e.g. `created_notes`) to ordered result ids.
pub type ActionMetadata = BTreeMap<String, Vec<String>>;

/// Final answer plus the action metadata accumulated along the way.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub metadata: ActionMetadata,
}

/// Progress events emitted by the streaming variant, in order of
/// occurrence. Consumption is single-pass and forward-only; the producer
/// never waits on the consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The model is about to be invoked.
    Thinking { iteration: usize },
    /// The model's turn has arrived.
    MarkThinking,
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        name: String,
        success: bool,
    },
    TextChunk {
        text: String,
    },
    Done {
        metadata: ActionMetadata,
        iterations: usize,
    },
    Error {
        message: String,
    },
}

/// The orchestrator driving repeated model invocation and tool execution.
pub struct PicoAgent {
    registry: Registry,
    completion: Arc<dyn CompletionProvider>,
    /// Exported tool catalog, cached for the process lifetime: capability
    /// sets do not change at runtime.
    tools: OnceCell<Vec<ToolDefinition>>,
}

impl PicoAgent {
    pub fn new(registry: Registry, completion: Arc<dyn CompletionProvider>) -> Self {
        let agent = Self {
            registry,
            completion,
            tools: OnceCell::new(),
        };
        info!(
            "agent initialized with providers: {:?}, {} operations",
            agent.registry.provider_names(),
            agent.registry.list_operations().len()
        );
        agent
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn tools(&self) -> &[ToolDefinition] {
        self.tools.get_or_init(|| self.registry.export_for_model())
    }

    /// Static instructions, the current date, and a best-effort snapshot
    /// of every provider resource so the model starts with full context.
    fn system_message(&self) -> String {
        let today = Local::now().format("%Y-%m-%d");
        let mut system = format!("{BASE_SYSTEM_PROMPT}\n\nToday's date is {today}.");
        let context = self.registry.aggregate_context();
        if !context.is_empty() {
            system.push_str("\n\n# Current user data\n\n");
            system.push_str(&context);
        }
        system
    }

    /// Process a conversation to completion. `messages` is mutated in
    /// place: the model's turns and synthesized tool-result turns are
    /// appended, so callers must expect the list to grow.
    ///
    /// Tool failures never surface here; they are folded back into the
    /// conversation. Only completion-provider failures return `Err`.
    pub async fn chat(
        &self,
        messages: &mut Vec<Turn>,
        max_tokens: u32,
    ) -> Result<ChatResponse, CompletionError> {
        info!("=== new chat session ({} turns) ===", messages.len());
        let (response, metadata, iterations) = self.run_loop(messages, max_tokens, None).await?;
        info!(
            "chat complete: {} chars, {} iterations",
            response.len(),
            iterations
        );
        Ok(ChatResponse { response, metadata })
    }

    /// Streaming variant of [`chat`](Self::chat): same state machine, but
    /// emits discrete events as they occur and finishes with `done` (or
    /// `error` if the completion provider fails). The producer runs to
    /// completion whether or not the stream is drained.
    ///
    /// `text_chunk` events carry text from every model turn as it arrives,
    /// including narration preceding tool calls in intermediate turns.
    /// Concatenating chunks can therefore yield more text than the
    /// blocking [`chat`](Self::chat) response, which is only the final
    /// turn's text; `mark_thinking` separates one turn's chunks from the
    /// next.
    pub fn chat_stream(
        self: &Arc<Self>,
        mut messages: Vec<Turn>,
        max_tokens: u32,
    ) -> UnboundedReceiverStream<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            match agent.run_loop(&mut messages, max_tokens, Some(&tx)).await {
                Ok((_, metadata, iterations)) => {
                    let _ = tx.send(AgentEvent::Done {
                        metadata,
                        iterations,
                    });
                }
                Err(e) => {
                    error!("chat stream aborted: {}", e);
                    let _ = tx.send(AgentEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        });
        UnboundedReceiverStream::new(rx)
    }

    async fn run_loop(
        &self,
        messages: &mut Vec<Turn>,
        max_tokens: u32,
        events: Option<&mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<(String, ActionMetadata, usize), CompletionError> {
        let system = self.system_message();
        let tools = self.tools();
        let mut metadata = ActionMetadata::new();
        let mut iteration = 0usize;
        let mut last_turn: Option<ModelTurn> = None;

        while iteration < MAX_ITERATIONS {
            self.emit(events, AgentEvent::Thinking { iteration });
            let turn = self
                .invoke_model(&system, messages, tools, max_tokens, events)
                .await?;
            self.emit(events, AgentEvent::MarkThinking);

            if !turn.requests_tools() {
                last_turn = Some(turn);
                break;
            }

            iteration += 1;
            info!("agentic iteration {}: model requested tools", iteration);

            let results = self.execute_tool_batch(&turn.content, &mut metadata, events);
            debug!("returning {} tool results to the model", results.len());

            messages.push(Turn::assistant_blocks(turn.content.clone()));
            messages.push(Turn::tool_results(results));
            last_turn = Some(turn);
        }

        if iteration >= MAX_ITERATIONS {
            warn!(
                "reached max iterations ({}), returning partial answer",
                MAX_ITERATIONS
            );
        }

        let response = last_turn.map(|t| t.text()).unwrap_or_default();
        Ok((response, metadata, iteration))
    }

    /// One model invocation. In streaming mode, text deltas are forwarded
    /// as `text_chunk` events while the call is in flight.
    async fn invoke_model(
        &self,
        system: &str,
        messages: &[Turn],
        tools: &[ToolDefinition],
        max_tokens: u32,
        events: Option<&mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<ModelTurn, CompletionError> {
        let Some(events) = events else {
            return self
                .completion
                .complete(system, messages, tools, max_tokens)
                .await;
        };

        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel::<String>();
        let mut call = Box::pin(
            self.completion
                .complete_stream(system, messages, tools, max_tokens, delta_tx),
        );

        loop {
            tokio::select! {
                Some(text) = delta_rx.recv() => {
                    self.emit(Some(events), AgentEvent::TextChunk { text });
                }
                result = &mut call => {
                    // Flush deltas that raced with completion.
                    while let Ok(text) = delta_rx.try_recv() {
                        self.emit(Some(events), AgentEvent::TextChunk { text });
                    }
                    return result;
                }
            }
        }
    }

    /// Execute every tool-invocation request in one model turn, in order.
    /// Failures become error-flagged tool results carrying the same
    /// request id; they never abort the loop. Server-side tool uses are
    /// logged only.
    fn execute_tool_batch(
        &self,
        blocks: &[ContentBlock],
        metadata: &mut ActionMetadata,
        events: Option<&mpsc::UnboundedSender<AgentEvent>>,
    ) -> Vec<ContentBlock> {
        let mut results = Vec::new();

        for block in blocks {
            match block {
                ContentBlock::ToolUse { id, name, input } => {
                    info!("calling operation: {}", name);
                    debug!("arguments: {}", input);
                    self.emit(
                        events,
                        AgentEvent::ToolCall {
                            name: name.clone(),
                            input: input.clone(),
                        },
                    );

                    match self.registry.invoke(name, input.clone()) {
                        Ok(value) => {
                            debug!("operation {} succeeded", name);
                            track_action(name, &value, metadata);
                            self.emit(
                                events,
                                AgentEvent::ToolResult {
                                    name: name.clone(),
                                    success: true,
                                },
                            );
                            results.push(ContentBlock::tool_result(id, value.to_string()));
                        }
                        Err(e) => {
                            error!("operation {} failed: {}", name, e);
                            self.emit(
                                events,
                                AgentEvent::ToolResult {
                                    name: name.clone(),
                                    success: false,
                                },
                            );
                            results.push(ContentBlock::tool_error(id, format!("Error: {e}")));
                        }
                    }
                }
                ContentBlock::ServerToolUse { name, input, .. } => {
                    info!("server tool used: {} ({})", name, input);
                }
                _ => {}
            }
        }

        results
    }

    fn emit(&self, events: Option<&mpsc::UnboundedSender<AgentEvent>>, event: AgentEvent) {
        if let Some(tx) = events {
            // Receiver may have walked away; the loop keeps running.
            let _ = tx.send(event);
        }
    }
}

/// Best-effort introspection of side-effecting actions for the caller's
/// UI. An operation named `create_note` returning a record with an `id`
/// contributes that id under `created_notes`; results without an `id`
/// field contribute nothing.
fn track_action(operation: &str, result: &serde_json::Value, metadata: &mut ActionMetadata) {
    let Some(id) = result.get("id").and_then(|v| v.as_str()) else {
        return;
    };
    let Some((verb, noun)) = operation.split_once('_') else {
        return;
    };
    let key = format!("{verb}d_{noun}s");
    metadata.entry(key.clone()).or_default().push(id.to_string());
    debug!("tracked action: {} -> {}", key, id);
}
