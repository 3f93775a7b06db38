pub mod config;
pub mod types;

pub use config::AoedeConfig;
pub use types::{
    AffectUpdate, DispatchDecision, MemoryItem, MemoryKind, ReplyDraft, Role, SchemaError,
    StoredMessage, SuggestionCandidate, ToolCallRequest, Turn,
};
