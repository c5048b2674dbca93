//! Todos provider
//!
//! Single JSON array file. Publishes create/update/complete/search/reorder
//! operations and a `todos://all` resource. Search goes through the
//! relevance ranker; priority and due date fall back to natural-language
//! extraction from the todo text when the caller omits them.

use std::fs;
use std::path::PathBuf;

use chrono::{Duration, Local, NaiveDate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::protocol::{
    CapabilityProvider, OperationDescriptor, ResourceDescriptor,
};
use crate::search::{self, SearchRecord};

use super::{now_iso, timestamp_id};

pub const TODOS_RESOURCE_URI: &str = "todos://all";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub text: String,
    pub completed: bool,
    pub priority: String,
    pub due_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
}

impl SearchRecord for Todo {
    fn primary_text(&self) -> &str {
        &self.text
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn due_date(&self) -> Option<&str> {
        self.due_date.as_deref()
    }
}

/// Caller-supplied fields for a new todo; anything omitted falls back to
/// the text heuristics.
#[derive(Debug, Default, Deserialize)]
pub struct NewTodo {
    pub text: String,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct TodoUpdate {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct UpdateArgs {
    todo_id: String,
    #[serde(flatten)]
    fields: TodoUpdate,
}

#[derive(Deserialize)]
struct CompleteArgs {
    todo_id: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize)]
struct ReorderArgs {
    todo_ids: String,
}

pub struct TodosProvider {
    todos_file: PathBuf,
    lock: Mutex<()>,
}

impl TodosProvider {
    pub fn new(todos_file: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let todos_file = todos_file.into();
        if let Some(parent) = todos_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let provider = Self {
            todos_file,
            lock: Mutex::new(()),
        };
        if !provider.todos_file.exists() {
            provider.save(&[])?;
        }
        Ok(provider)
    }

    fn load(&self) -> Result<Vec<Todo>, ProviderError> {
        let _guard = self.lock.lock();
        let raw = fs::read_to_string(&self.todos_file)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, todos: &[Todo]) -> Result<(), ProviderError> {
        let _guard = self.lock.lock();
        let raw = serde_json::to_string_pretty(todos)?;
        fs::write(&self.todos_file, raw)?;
        Ok(())
    }

    pub fn get_all(&self) -> Result<Vec<Todo>, ProviderError> {
        self.load()
    }

    pub fn get(&self, id: &str) -> Result<Option<Todo>, ProviderError> {
        Ok(self.load()?.into_iter().find(|t| t.id == id))
    }

    pub fn create(&self, new: NewTodo) -> Result<Todo, ProviderError> {
        let priority = new
            .priority
            .unwrap_or_else(|| parse_priority(&new.text).to_string());
        let due_date = new
            .due_date
            .or_else(|| parse_due_date(&new.text, Local::now().date_naive()));

        let todo = Todo {
            id: timestamp_id("todo"),
            text: new.text,
            completed: false,
            priority,
            due_date,
            tags: new.tags.unwrap_or_default(),
            created_at: now_iso(),
        };

        let mut todos = self.load()?;
        todos.push(todo.clone());
        self.save(&todos)?;
        debug!("created todo {}", todo.id);
        Ok(todo)
    }

    pub fn update(&self, id: &str, update: TodoUpdate) -> Result<Todo, ProviderError> {
        let mut todos = self.load()?;
        let todo = todos
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| ProviderError::Execution(format!("Todo {id} not found")))?;

        if let Some(text) = update.text {
            todo.text = text;
        }
        if let Some(completed) = update.completed {
            todo.completed = completed;
        }
        if let Some(priority) = update.priority {
            todo.priority = priority;
        }
        if let Some(due_date) = update.due_date {
            todo.due_date = Some(due_date);
        }
        if let Some(tags) = update.tags {
            todo.tags = tags;
        }

        let updated = todo.clone();
        self.save(&todos)?;
        Ok(updated)
    }

    pub fn complete(&self, id: &str) -> Result<Todo, ProviderError> {
        self.update(
            id,
            TodoUpdate {
                completed: Some(true),
                ..TodoUpdate::default()
            },
        )
    }

    pub fn delete(&self, id: &str) -> Result<bool, ProviderError> {
        let mut todos = self.load()?;
        let before = todos.len();
        todos.retain(|t| t.id != id);
        if todos.len() < before {
            self.save(&todos)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Reorder by explicit id list; todos not listed keep their relative
    /// order at the end.
    pub fn reorder(&self, ids: &[String]) -> Result<Vec<Todo>, ProviderError> {
        let mut remaining = self.load()?;
        let mut reordered = Vec::with_capacity(remaining.len());

        for id in ids {
            if let Some(pos) = remaining.iter().position(|t| &t.id == id) {
                reordered.push(remaining.remove(pos));
            }
        }
        reordered.extend(remaining);

        self.save(&reordered)?;
        Ok(reordered)
    }

    /// Relevance-ranked search; an empty query returns everything.
    pub fn search(&self, query: &str) -> Result<Vec<Todo>, ProviderError> {
        let todos = self.load()?;
        let ranked = search::rank(query, &todos, Local::now().date_naive());
        debug!("search '{}' matched {} todos", query, ranked.len());
        Ok(ranked.into_iter().map(|s| s.record).collect())
    }

    fn all_content(&self) -> Result<String, ProviderError> {
        let todos = self.load()?;
        if todos.is_empty() {
            return Ok("No todos available.".to_string());
        }

        let mut content = Vec::new();
        let active: Vec<&Todo> = todos.iter().filter(|t| !t.completed).collect();
        let completed: Vec<&Todo> = todos.iter().filter(|t| t.completed).collect();

        if !active.is_empty() {
            content.push("## Active Todos:".to_string());
            for todo in active {
                content.push(format!("- [ ] {}", todo.text));
            }
        }
        if !completed.is_empty() {
            content.push("\n## Completed Todos:".to_string());
            for todo in completed {
                content.push(format!("- [x] {}", todo.text));
            }
        }

        Ok(content.join("\n"))
    }
}

/// Keyword-based priority extraction: high for urgency words, low for
/// someday words, medium otherwise.
fn parse_priority(text: &str) -> &'static str {
    const HIGH: &[&str] = &["urgent", "important", "critical", "asap", "high priority"];
    const LOW: &[&str] = &["low priority", "minor", "someday", "maybe"];

    let text_lower = text.to_lowercase();
    if HIGH.iter().any(|w| text_lower.contains(w)) {
        "high"
    } else if LOW.iter().any(|w| text_lower.contains(w)) {
        "low"
    } else {
        "medium"
    }
}

/// Pull a due date out of natural language: relative phrases first, then
/// the words after "by"/"on"/"before"/"due" tried as a date.
fn parse_due_date(text: &str, today: NaiveDate) -> Option<String> {
    let text_lower = text.to_lowercase();

    let relative = if text_lower.contains("today") {
        Some(today)
    } else if text_lower.contains("tomorrow") {
        Some(today + Duration::days(1))
    } else if text_lower.contains("next week") {
        Some(today + Duration::weeks(1))
    } else if text_lower.contains("next month") {
        Some(today + Duration::days(30))
    } else {
        None
    };
    if let Some(date) = relative {
        return Some(date.format("%Y-%m-%d").to_string());
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        if matches!(word.to_lowercase().as_str(), "by" | "on" | "before" | "due") {
            // Try the next few words as a date, longest candidate first.
            for take in (1..=3.min(words.len() - i - 1)).rev() {
                let candidate = words[i + 1..i + 1 + take].join(" ");
                if let Some(date) = search::parse_query_date(&candidate, today) {
                    return Some(date.format("%Y-%m-%d").to_string());
                }
            }
        }
    }

    None
}

impl CapabilityProvider for TodosProvider {
    fn name(&self) -> &str {
        "Todos"
    }

    fn description(&self) -> &str {
        "Manages todo list with create, update, complete, and delete capabilities"
    }

    fn list_operations(&self) -> Vec<OperationDescriptor> {
        vec![
            OperationDescriptor::new(
                "create_todo",
                "Create a new todo item. IMPORTANT: Due date is REQUIRED. If the user hasn't \
                 specified when the task is due, you MUST ask them for a due date before creating \
                 the todo. Priority is optional and auto-detected from text if not specified.",
            )
            .required(
                "text",
                "string",
                "Todo text/description. Should NOT include the due date in the text - use the \
                 due_date field instead.",
            )
            .required(
                "due_date",
                "string",
                "Due date in ISO format (YYYY-MM-DD). REQUIRED - you must ask the user for this \
                 if not provided.",
            )
            .param(
                "priority",
                "string",
                "Priority level: 'high', 'medium', or 'low'. Auto-detected from keywords like \
                 'urgent', 'important' if not provided.",
            )
            .param(
                "tags",
                "array",
                "Optional list of tags to categorize the todo (e.g., ['work', 'urgent']).",
            ),
            OperationDescriptor::new(
                "update_todo",
                "Update an existing todo's text, priority, or due date. Use this to change a \
                 todo's priority level or reschedule its due date.",
            )
            .required("todo_id", "string", "ID of the todo to update")
            .param("text", "string", "New todo text/description")
            .param("priority", "string", "New priority level: 'high', 'medium', or 'low'")
            .param("due_date", "string", "New due date in ISO format (YYYY-MM-DD)"),
            OperationDescriptor::new("complete_todo", "Mark a todo as completed")
                .required("todo_id", "string", "ID of the todo to complete"),
            OperationDescriptor::new(
                "search_todos",
                "Search todos by text, tags, or due date. Supports flexible matching - keywords, \
                 partial dates (e.g., '10/17', 'Oct 17'), or tags. Returns matching todos with \
                 their full information including IDs for updates.",
            )
            .required(
                "query",
                "string",
                "Search query - keywords from todo text, tag names, or dates in various formats",
            ),
            OperationDescriptor::new(
                "reorder_todos",
                "Reorder todos by specifying the desired order of todo IDs. Use this when the \
                 user wants to move a todo to the top, bottom, or rearrange priority order.",
            )
            .required(
                "todo_ids",
                "string",
                "Comma-separated list of todo IDs in the desired order. Todos not listed will \
                 be appended at the end.",
            ),
        ]
    }

    fn invoke(&self, operation: &str, arguments: Value) -> Result<Value, ProviderError> {
        match operation {
            "create_todo" => {
                let args: NewTodo = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                Ok(serde_json::to_value(self.create(args)?)?)
            }
            "update_todo" => {
                let args: UpdateArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                Ok(serde_json::to_value(self.update(&args.todo_id, args.fields)?)?)
            }
            "complete_todo" => {
                let args: CompleteArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                Ok(serde_json::to_value(self.complete(&args.todo_id)?)?)
            }
            "search_todos" => {
                let args: SearchArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                Ok(serde_json::to_value(self.search(&args.query)?)?)
            }
            "reorder_todos" => {
                let args: ReorderArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                let ids: Vec<String> = args
                    .todo_ids
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Ok(serde_json::to_value(self.reorder(&ids)?)?)
            }
            _ => Err(ProviderError::OperationNotFound(operation.to_string())),
        }
    }

    fn list_resources(&self) -> Vec<ResourceDescriptor> {
        vec![ResourceDescriptor::new(
            "Todo List",
            TODOS_RESOURCE_URI,
            "Complete todo list with active and completed items",
        )]
    }

    fn read_resource(&self, uri: &str) -> Result<String, ProviderError> {
        if uri == TODOS_RESOURCE_URI {
            self.all_content()
        } else {
            Err(ProviderError::ResourceNotFound(uri.to_string()))
        }
    }
}
