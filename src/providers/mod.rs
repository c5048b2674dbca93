//! Capability providers
//!
//! The three concrete domains behind the registry: notes, todos and
//! preferences. Each one is flat-file JSON persistence plus the operations
//! and resources it publishes through the capability contract.

pub mod notes;
pub mod preferences;
pub mod todos;

pub use notes::{Note, NotesProvider};
pub use preferences::PreferencesProvider;
pub use todos::{Todo, TodosProvider};

use std::time::{SystemTime, UNIX_EPOCH};

/// Nanosecond-resolution ids stay unique even when records are created in
/// rapid succession.
pub(crate) fn timestamp_id(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{prefix}-{nanos}")
}

pub(crate) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
