//! End-to-end tests for the agentic loop using a scripted completion
//! provider and an in-memory capability provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use pico_mcp::agent::{AgentEvent, PicoAgent, MAX_ITERATIONS};
use pico_mcp::completion::{CompletionProvider, ModelTurn, StopReason};
use pico_mcp::conversation::{ContentBlock, Turn, TurnContent};
use pico_mcp::error::{CompletionError, ProviderError};
use pico_mcp::protocol::{
    CapabilityProvider, OperationDescriptor, Registry, ResourceDescriptor, ToolDefinition,
};

/// Completion provider that replays a fixed script of model turns. When
/// the script runs out it keeps returning the last turn, which lets a
/// single tool-use turn simulate a model that never stops asking.
struct ScriptedModel {
    script: Mutex<VecDeque<ModelTurn>>,
    repeat_last: Option<ModelTurn>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            repeat_last: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn repeating(turn: ModelTurn) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat_last: Some(turn),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedModel {
    async fn complete(
        &self,
        _system: &str,
        _conversation: &[Turn],
        _tools: &[ToolDefinition],
        _max_tokens: u32,
    ) -> Result<ModelTurn, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(turn) = self.script.lock().pop_front() {
            return Ok(turn);
        }
        match &self.repeat_last {
            Some(turn) => Ok(turn.clone()),
            None => Err(CompletionError::Malformed("script exhausted".into())),
        }
    }
}

/// In-memory provider with one succeeding and one failing operation.
struct TestProvider {
    invocations: AtomicUsize,
}

impl TestProvider {
    fn new() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
        }
    }
}

impl CapabilityProvider for TestProvider {
    fn name(&self) -> &str {
        "Test"
    }

    fn description(&self) -> &str {
        "test provider"
    }

    fn list_operations(&self) -> Vec<OperationDescriptor> {
        vec![
            OperationDescriptor::new("create_note", "create")
                .required("title", "string", "title"),
            OperationDescriptor::new("break_things", "always fails"),
        ]
    }

    fn invoke(&self, operation: &str, _arguments: Value) -> Result<Value, ProviderError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match operation {
            "create_note" => Ok(json!({"id": "note-42", "title": "t"})),
            "break_things" => Err(ProviderError::Execution("storage offline".into())),
            _ => Err(ProviderError::OperationNotFound(operation.to_string())),
        }
    }

    fn list_resources(&self) -> Vec<ResourceDescriptor> {
        Vec::new()
    }

    fn read_resource(&self, uri: &str) -> Result<String, ProviderError> {
        Err(ProviderError::ResourceNotFound(uri.to_string()))
    }
}

fn tool_turn(id: &str, name: &str, input: Value) -> ModelTurn {
    ModelTurn {
        content: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
        stop_reason: StopReason::ToolUse,
    }
}

fn text_turn(text: &str) -> ModelTurn {
    ModelTurn {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
    }
}

fn agent_with(model: ScriptedModel) -> (PicoAgent, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let mut registry = Registry::new();
    registry.register(Arc::new(TestProvider::new()));
    let agent = PicoAgent::new(registry, Arc::clone(&model) as Arc<dyn CompletionProvider>);
    (agent, model)
}

#[tokio::test]
async fn tool_results_flow_back_and_metadata_accumulates() {
    let (agent, model) = agent_with(ScriptedModel::new(vec![
        tool_turn("toolu_1", "create_note", json!({"title": "t"})),
        text_turn("Created your note."),
    ]));

    let mut messages = vec![Turn::user("make a note")];
    let result = agent.chat(&mut messages, 1024).await.unwrap();

    assert_eq!(result.response, "Created your note.");
    assert_eq!(result.metadata["created_notes"], vec!["note-42"]);
    assert_eq!(model.calls(), 2);

    // One assistant turn plus one tool-result turn appended per round.
    assert_eq!(messages.len(), 3);
    let TurnContent::Blocks(blocks) = &messages[2].content else {
        panic!("expected block turn");
    };
    match &blocks[0] {
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            assert_eq!(tool_use_id, "toolu_1");
            assert!(content.contains("note-42"));
            assert!(!*is_error);
        }
        other => panic!("expected tool_result, got {other:?}"),
    }
}

#[tokio::test]
async fn tool_failure_is_folded_into_the_conversation() {
    let (agent, _model) = agent_with(ScriptedModel::new(vec![
        tool_turn("toolu_9", "break_things", json!({})),
        text_turn("That didn't work, sorry."),
    ]));

    let mut messages = vec![Turn::user("break things")];
    let result = agent.chat(&mut messages, 1024).await.unwrap();

    // Failure never surfaced as Err; the model saw it and answered.
    assert_eq!(result.response, "That didn't work, sorry.");
    assert!(result.metadata.is_empty());

    let TurnContent::Blocks(blocks) = &messages[2].content else {
        panic!("expected block turn");
    };
    match &blocks[0] {
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            assert_eq!(tool_use_id, "toolu_9");
            assert!(*is_error);
            assert!(content.starts_with("Error:"));
            assert!(content.contains("storage offline"));
        }
        other => panic!("expected tool_result, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_operation_becomes_an_error_result() {
    let (agent, _model) = agent_with(ScriptedModel::new(vec![
        tool_turn("toolu_2", "no_such_op", json!({})),
        text_turn("done"),
    ]));

    let mut messages = vec![Turn::user("hi")];
    agent.chat(&mut messages, 1024).await.unwrap();

    let TurnContent::Blocks(blocks) = &messages[2].content else {
        panic!("expected block turn");
    };
    assert!(matches!(
        &blocks[0],
        ContentBlock::ToolResult { is_error: true, .. }
    ));
}

#[tokio::test]
async fn loop_stops_at_the_iteration_cap() {
    let (agent, model) = agent_with(ScriptedModel::repeating(tool_turn(
        "toolu_x",
        "create_note",
        json!({"title": "again"}),
    )));

    let mut messages = vec![Turn::user("loop forever")];
    let result = agent.chat(&mut messages, 1024).await.unwrap();

    // Exactly MAX_ITERATIONS model invocations, never an eleventh.
    assert_eq!(model.calls(), MAX_ITERATIONS);
    assert_eq!(result.metadata["created_notes"].len(), MAX_ITERATIONS);
    // Each round appends assistant + tool-result turns.
    assert_eq!(messages.len(), 1 + 2 * MAX_ITERATIONS);
    // The last turn had no text, so the partial answer is empty.
    assert_eq!(result.response, "");
}

#[tokio::test]
async fn completion_failure_aborts_the_chat() {
    let (agent, _model) = agent_with(ScriptedModel::new(vec![]));
    let mut messages = vec![Turn::user("hi")];
    let err = agent.chat(&mut messages, 1024).await.unwrap_err();
    assert!(matches!(err, CompletionError::Malformed(_)));
}

#[tokio::test]
async fn stream_and_blocking_paths_agree() {
    let script = || {
        vec![
            tool_turn("toolu_1", "create_note", json!({"title": "t"})),
            text_turn("All done."),
        ]
    };

    let (agent, _model) = agent_with(ScriptedModel::new(script()));
    let mut messages = vec![Turn::user("make a note")];
    let blocking = agent.chat(&mut messages, 1024).await.unwrap();

    let (agent, _model) = agent_with(ScriptedModel::new(script()));
    let agent = Arc::new(agent);
    let mut stream = agent.chat_stream(vec![Turn::user("make a note")], 1024);

    let mut text = String::new();
    let mut tool_calls = 0;
    let mut done = None;
    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::TextChunk { text: chunk } => text.push_str(&chunk),
            AgentEvent::ToolCall { name, .. } => {
                assert_eq!(name, "create_note");
                tool_calls += 1;
            }
            AgentEvent::ToolResult { success, .. } => assert!(success),
            AgentEvent::Done {
                metadata,
                iterations,
            } => done = Some((metadata, iterations)),
            AgentEvent::Error { message } => panic!("unexpected error event: {message}"),
            AgentEvent::Thinking { .. } | AgentEvent::MarkThinking => {}
        }
    }

    let (metadata, iterations) = done.expect("stream must end with done");
    assert_eq!(text, blocking.response);
    assert_eq!(metadata, blocking.metadata);
    assert_eq!(iterations, 1);
    assert_eq!(tool_calls, 1);
}

#[tokio::test]
async fn intermediate_turn_text_streams_but_stays_out_of_the_final_answer() {
    let script = || {
        vec![
            ModelTurn {
                content: vec![
                    ContentBlock::text("Let me create that. "),
                    ContentBlock::ToolUse {
                        id: "toolu_1".into(),
                        name: "create_note".into(),
                        input: json!({"title": "t"}),
                    },
                ],
                stop_reason: StopReason::ToolUse,
            },
            text_turn("Done."),
        ]
    };

    let (agent, _model) = agent_with(ScriptedModel::new(script()));
    let mut messages = vec![Turn::user("make a note")];
    let blocking = agent.chat(&mut messages, 1024).await.unwrap();
    // Blocking callers get only the final turn's text.
    assert_eq!(blocking.response, "Done.");

    let (agent, _model) = agent_with(ScriptedModel::new(script()));
    let agent = Arc::new(agent);
    let mut stream = agent.chat_stream(vec![Turn::user("make a note")], 1024);

    let mut text = String::new();
    let mut done = None;
    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::TextChunk { text: chunk } => text.push_str(&chunk),
            AgentEvent::Done { metadata, .. } => done = Some(metadata),
            _ => {}
        }
    }

    // Streaming consumers also see the narration before the tool call.
    assert_eq!(text, "Let me create that. Done.");
    assert_eq!(done.expect("done event"), blocking.metadata);
}

#[tokio::test]
async fn concrete_providers_share_state_with_the_registry() {
    use pico_mcp::providers::{NotesProvider, PreferencesProvider, TodosProvider};
    use tempfile::TempDir;

    let dir = TempDir::new().expect("temp dir");
    let notes = Arc::new(NotesProvider::new(dir.path().join("notes")).unwrap());
    let todos = Arc::new(TodosProvider::new(dir.path().join("todos.json")).unwrap());
    let preferences =
        Arc::new(PreferencesProvider::new(dir.path().join("preferences.json")).unwrap());

    // Same wiring as the binary: the registry holds clones, the caller
    // keeps its own handles.
    let mut registry = Registry::new();
    registry.register(Arc::clone(&preferences) as Arc<dyn CapabilityProvider>);
    registry.register(Arc::clone(&notes) as Arc<dyn CapabilityProvider>);
    registry.register(Arc::clone(&todos) as Arc<dyn CapabilityProvider>);
    assert_eq!(registry.provider_names(), vec!["Preferences", "Notes", "Todos"]);

    let created = registry
        .invoke("create_note", json!({"title": "Groceries", "content": "milk"}))
        .unwrap();
    let id = created["id"].as_str().unwrap();

    // The direct handle observes what the registry route wrote.
    let note = notes.get(id).unwrap().expect("note visible through handle");
    assert_eq!(note.title, "Groceries");
}

#[tokio::test]
async fn stream_reports_completion_failure_as_error_event() {
    let (agent, _model) = agent_with(ScriptedModel::new(vec![]));
    let agent = Arc::new(agent);
    let mut stream = agent.chat_stream(vec![Turn::user("hi")], 1024);

    let mut saw_error = false;
    while let Some(event) = stream.next().await {
        if let AgentEvent::Error { message } = event {
            assert!(message.contains("script exhausted"));
            saw_error = true;
        }
    }
    assert!(saw_error);
}
