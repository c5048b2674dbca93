//! Preferences provider
//!
//! Learned user preferences grouped into named sections, stored as one
//! JSON object. Updates are merged by appending any preference string not
//! already present in its section, so repeated updates stay idempotent.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::protocol::{
    CapabilityProvider, OperationDescriptor, ResourceDescriptor,
};

pub const PREFERENCES_RESOURCE_URI: &str = "preferences://all";

/// Section name -> list of preference statements.
pub type PreferenceStore = BTreeMap<String, Vec<String>>;

/// Section name -> key -> preference statement. Keys label the update but
/// only the statements are stored.
pub type PreferenceUpdates = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Deserialize)]
struct GetArgs {
    #[serde(default)]
    sections: String,
}

#[derive(Deserialize)]
struct UpdateArgs {
    updates: String,
}

pub struct PreferencesProvider {
    preferences_file: PathBuf,
    lock: Mutex<()>,
}

impl PreferencesProvider {
    pub fn new(preferences_file: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let preferences_file = preferences_file.into();
        if let Some(parent) = preferences_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let provider = Self {
            preferences_file,
            lock: Mutex::new(()),
        };
        if !provider.preferences_file.exists() {
            provider.save(&default_preferences())?;
        }
        Ok(provider)
    }

    fn load(&self) -> Result<PreferenceStore, ProviderError> {
        let _guard = self.lock.lock();
        let raw = fs::read_to_string(&self.preferences_file)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, prefs: &PreferenceStore) -> Result<(), ProviderError> {
        let _guard = self.lock.lock();
        let raw = serde_json::to_string_pretty(prefs)?;
        fs::write(&self.preferences_file, raw)?;
        Ok(())
    }

    /// Preferences for the requested sections, or the whole store when no
    /// sections are named. Unknown sections come back empty.
    pub fn get_preferences(
        &self,
        sections: Option<&[String]>,
    ) -> Result<PreferenceStore, ProviderError> {
        let prefs = self.load()?;
        match sections {
            Some(sections) => Ok(sections
                .iter()
                .map(|s| (s.clone(), prefs.get(s).cloned().unwrap_or_default()))
                .collect()),
            None => Ok(prefs),
        }
    }

    /// Merge updates into the store and return the full merged structure.
    pub fn update_preferences(
        &self,
        updates: &PreferenceUpdates,
    ) -> Result<PreferenceStore, ProviderError> {
        let mut prefs = self.load()?;
        for (section, entries) in updates {
            let list = prefs.entry(section.clone()).or_default();
            for pref in entries.values() {
                if !list.contains(pref) {
                    list.push(pref.clone());
                }
            }
        }
        self.save(&prefs)?;
        debug!("merged preferences across {} sections", updates.len());
        Ok(prefs)
    }

    fn all_content(&self) -> Result<String, ProviderError> {
        let prefs = self.load()?;
        let mut content = String::from("# User Preferences\n\n");
        for (section, preferences) in &prefs {
            if preferences.is_empty() {
                continue;
            }
            content.push_str(&format!("## {}\n", section_title(section)));
            for pref in preferences {
                content.push_str(&format!("- {pref}\n"));
            }
            content.push('\n');
        }
        Ok(content)
    }
}

fn default_preferences() -> PreferenceStore {
    let mut prefs = PreferenceStore::new();
    prefs.insert(
        "general".to_string(),
        vec![
            "User prefers concise and helpful responses".to_string(),
            "User likes proactive suggestions".to_string(),
        ],
    );
    prefs.insert("notes_plugin".to_string(), Vec::new());
    prefs.insert("todos_plugin".to_string(), Vec::new());
    prefs
}

/// "todos_plugin" -> "Todos", "general" -> "General".
fn section_title(section: &str) -> String {
    section
        .trim_end_matches("_plugin")
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl CapabilityProvider for PreferencesProvider {
    fn name(&self) -> &str {
        "Preferences"
    }

    fn description(&self) -> &str {
        "Manages user preferences and learns user behavior to provide personalized assistance"
    }

    fn list_operations(&self) -> Vec<OperationDescriptor> {
        vec![
            OperationDescriptor::new(
                "get_preferences",
                "Get user preferences from specified sections or all sections. Use this to \
                 understand user's preferences, work style, and learned behaviors.",
            )
            .param(
                "sections",
                "string",
                "Comma-separated list of sections to retrieve (e.g., 'general,todos_plugin'). \
                 Leave empty for all preferences.",
            ),
            OperationDescriptor::new(
                "update_preferences",
                "Update user preferences. Provide new preferences and they will be merged with \
                 existing ones without duplicates. Use this after completing tasks or when \
                 learning new patterns about the user.",
            )
            .required(
                "updates",
                "string",
                r#"JSON string of updates: {"section": {"key": "preference description"}}. Example: {"general": {"name": "User name is Tony"}, "todos_plugin": {"organization": "User prefers Eisenhower urgency matrix"}}"#,
            ),
        ]
    }

    fn invoke(&self, operation: &str, arguments: Value) -> Result<Value, ProviderError> {
        match operation {
            "get_preferences" => {
                let args: GetArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                let sections: Option<Vec<String>> = if args.sections.trim().is_empty() {
                    None
                } else {
                    Some(
                        args.sections
                            .split(',')
                            .map(|s| s.trim().to_string())
                            .collect(),
                    )
                };
                Ok(serde_json::to_value(
                    self.get_preferences(sections.as_deref())?,
                )?)
            }
            "update_preferences" => {
                let args: UpdateArgs = serde_json::from_value(arguments)
                    .map_err(|e| ProviderError::invalid_arguments(operation, e))?;
                let updates: PreferenceUpdates = serde_json::from_str(&args.updates)
                    .map_err(|e| {
                        ProviderError::invalid_arguments(
                            operation,
                            format!("invalid JSON in updates parameter: {e}"),
                        )
                    })?;
                Ok(serde_json::to_value(self.update_preferences(&updates)?)?)
            }
            _ => Err(ProviderError::OperationNotFound(operation.to_string())),
        }
    }

    fn list_resources(&self) -> Vec<ResourceDescriptor> {
        vec![ResourceDescriptor::new(
            "User Preferences",
            PREFERENCES_RESOURCE_URI,
            "Complete user preferences including general settings and plugin-specific preferences",
        )]
    }

    fn read_resource(&self, uri: &str) -> Result<String, ProviderError> {
        if uri == PREFERENCES_RESOURCE_URI {
            self.all_content()
        } else {
            Err(ProviderError::ResourceNotFound(uri.to_string()))
        }
    }
}
