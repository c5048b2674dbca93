//! Notes provider
//!
//! One JSON file per note under the notes directory. Publishes search,
//! create and update operations plus a `notes://all` resource rendering
//! every note for the model's context.

use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::protocol::{
    CapabilityProvider, OperationDescriptor, ResourceDescriptor,
};

use super::{now_iso, timestamp_id};

pub const NOTES_RESOURCE_URI: &str = "notes://all";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NotesProvider {
    notes_dir: PathBuf,
    lock: Mutex<()>,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize)]
struct CreateArgs {
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct UpdateArgs {
    note_id: String,
    title: Option<String>,
    content: Option<String>,
}

impl NotesProvider {
    pub fn new(notes_dir: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let notes_dir = notes_dir.into();
        fs::create_dir_all(&notes_dir)?;
        Ok(Self {
            notes_dir,
            lock: Mutex::new(()),
        })
    }

    fn note_path(&self, id: &str) -> PathBuf {
        self.notes_dir.join(format!("{id}.json"))
    }

    /// All notes, most recently updated first.
    pub fn get_all(&self) -> Result<Vec<Note>, ProviderError> {
        let _guard = self.lock.lock();
        let mut notes = Vec::new();
        for entry in fs::read_dir(&self.notes_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let raw = fs::read_to_string(&path)?;
                notes.push(serde_json::from_str(&raw)?);
            }
        }
        notes.sort_by(|a: &Note, b: &Note| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }

    pub fn get(&self, id: &str) -> Result<Option<Note>, ProviderError> {
        let _guard = self.lock.lock();
        let path = self.note_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Case-insensitive word and phrase matching over title and content.
    pub fn search(&self, query: &str) -> Result<Vec<Note>, ProviderError> {
        let query_lower = query.to_lowercase();
        let words: Vec<&str> = query_lower.split_whitespace().collect();
        let notes = self.get_all()?;

        Ok(notes
            .into_iter()
            .filter(|note| {
                let title = note.title.to_lowercase();
                let content = note.content.to_lowercase();
                let word_match = words
                    .iter()
                    .any(|w| title.contains(w) || content.contains(w));
                let phrase_match =
                    title.contains(&query_lower) || content.contains(&query_lower);
                word_match || phrase_match
            })
            .collect())
    }

    pub fn create(&self, title: &str, content: &str) -> Result<Note, ProviderError> {
        let now = now_iso();
        let note = Note {
            id: timestamp_id("note"),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        self.write(&note)?;
        debug!("created note {}", note.id);
        Ok(note)
    }

    pub fn update(
        &self,
        id: &str,
        title: Option<&str>,
        content: Option<&str>,
    ) -> Result<Note, ProviderError> {
        let mut note = self
            .get(id)?
            .ok_or_else(|| ProviderError::Execution(format!("Note {id} not found")))?;
        if let Some(title) = title {
            note.title = title.to_string();
        }
        if let Some(content) = content {
            note.content = content.to_string();
        }
        note.updated_at = now_iso();
        self.write(&note)?;
        Ok(note)
    }

    pub fn delete(&self, id: &str) -> Result<bool, ProviderError> {
        let _guard = self.lock.lock();
        let path = self.note_path(id);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn write(&self, note: &Note) -> Result<(), ProviderError> {
        let _guard = self.lock.lock();
        let raw = serde_json::to_string_pretty(note)?;
        fs::write(self.note_path(&note.id), raw)?;
        Ok(())
    }

    fn all_content(&self) -> Result<String, ProviderError> {
        let notes = self.get_all()?;
        if notes.is_empty() {
            return Ok("No notes available.".to_string());
        }
        Ok(notes
            .iter()
            .map(|n| format!("# {}\n{}\n", n.title, n.content))
            .collect::<Vec<_>>()
            .join("\n---\n"))
    }
}

impl CapabilityProvider for NotesProvider {
    fn name(&self) -> &str {
        "Notes"
    }

    fn description(&self) -> &str {
        "Manages user notes with create, read, update, delete, and search capabilities"
    }

    fn list_operations(&self) -> Vec<OperationDescriptor> {
        vec![
            OperationDescriptor::new(
                "search_notes",
                "Search through all notes by title or content",
            )
            .required("query", "string", "Search query string"),
            OperationDescriptor::new("create_note", "Create a new note")
                .required("title", "string", "Note title")
                .param("content", "string", "Note content"),
            OperationDescriptor::new("update_note", "Update an existing note")
                .required("note_id", "string", "ID of the note to update")
                .param("title", "string", "New title (optional)")
                .param("content", "string", "New content (optional)"),
        ]
    }

    fn invoke(&self, operation: &str, arguments: Value) -> Result<Value, ProviderError> {
        match operation {
            "search_notes" => {
                let args: SearchArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                Ok(serde_json::to_value(self.search(&args.query)?)?)
            }
            "create_note" => {
                let args: CreateArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                Ok(serde_json::to_value(self.create(&args.title, &args.content)?)?)
            }
            "update_note" => {
                let args: UpdateArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                Ok(serde_json::to_value(self.update(
                    &args.note_id,
                    args.title.as_deref(),
                    args.content.as_deref(),
                )?)?)
            }
            _ => Err(ProviderError::OperationNotFound(operation.to_string())),
        }
    }

    fn list_resources(&self) -> Vec<ResourceDescriptor> {
        vec![ResourceDescriptor::new(
            "All Notes",
            NOTES_RESOURCE_URI,
            "Complete collection of all user notes",
        )]
    }

    fn read_resource(&self, uri: &str) -> Result<String, ProviderError> {
        if uri == NOTES_RESOURCE_URI {
            self.all_content()
        } else {
            Err(ProviderError::ResourceNotFound(uri.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn provider() -> (NotesProvider, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let provider = NotesProvider::new(dir.path().join("notes")).unwrap();
        (provider, dir)
    }

    #[test]
    fn create_and_get_round_trip() {
        let (notes, _dir) = provider();
        let created = notes.create("Groceries", "milk, eggs").unwrap();
        assert!(created.id.starts_with("note-"));

        let fetched = notes.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Groceries");
        assert!(notes.get("note-missing").unwrap().is_none());
    }

    #[test]
    fn update_missing_note_is_an_execution_error() {
        let (notes, _dir) = provider();
        let err = notes.update("note-missing", Some("x"), None).unwrap_err();
        assert!(matches!(err, ProviderError::Execution(_)));
    }

    #[test]
    fn search_matches_words_and_phrases() {
        let (notes, _dir) = provider();
        notes.create("Meeting notes", "discuss roadmap with team").unwrap();
        notes.create("Recipes", "pasta carbonara").unwrap();

        let hits = notes.search("roadmap").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Meeting notes");

        let hits = notes.search("pasta carbonara").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn invoke_validates_required_arguments() {
        let (notes, _dir) = provider();
        let err = notes.invoke("create_note", json!({})).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArguments { .. }));

        let err = notes.invoke("explode", json!({})).unwrap_err();
        assert!(matches!(err, ProviderError::OperationNotFound(_)));
    }

    #[test]
    fn invoke_create_returns_keyed_record() {
        let (notes, _dir) = provider();
        let value = notes
            .invoke("create_note", json!({"title": "T", "content": "c"}))
            .unwrap();
        assert!(value["id"].as_str().unwrap().starts_with("note-"));
    }

    #[test]
    fn resource_renders_all_notes() {
        let (notes, _dir) = provider();
        assert_eq!(notes.read_resource(NOTES_RESOURCE_URI).unwrap(), "No notes available.");

        notes.create("Title A", "body a").unwrap();
        let content = notes.read_resource(NOTES_RESOURCE_URI).unwrap();
        assert!(content.contains("# Title A"));

        let err = notes.read_resource("notes://one").unwrap_err();
        assert!(matches!(err, ProviderError::ResourceNotFound(_)));
    }
}
