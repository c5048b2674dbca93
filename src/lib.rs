//! Pico: a personal assistant backend built around a capability registry.
//!
//! Providers publish operations and resources through a uniform contract;
//! the agent drives an agentic loop over the Anthropic Messages API,
//! executing requested operations and folding results back into the
//! conversation. An axum HTTP layer exposes record CRUD and chat.

pub mod agent;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;
pub mod http;
pub mod protocol;
pub mod providers;
pub mod search;

pub use agent::{ActionMetadata, AgentEvent, ChatResponse, PicoAgent};
pub use completion::{ClaudeClient, CompletionProvider, ModelTurn, StopReason};
pub use config::Config;
pub use conversation::{ContentBlock, Role, Turn, TurnContent};
pub use error::{CompletionError, ProviderError};
pub use protocol::{
    CapabilityProvider, OperationDescriptor, Registry, ResourceDescriptor, ToolDefinition,
};
pub use providers::{NotesProvider, PreferencesProvider, TodosProvider};
