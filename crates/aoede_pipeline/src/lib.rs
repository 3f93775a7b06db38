pub mod budget;
pub mod builtins;
pub mod envbrief;
pub mod guard;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod retrieval;
pub mod schema;
pub mod tokens;
pub mod tools;

pub use builtins::register_builtins;
pub use guard::{FilterHits, OutputFilter};
pub use llm::{GenParams, ModelClient};
pub use pipeline::{FeedbackSignal, Pipeline, TurnOutcome};
pub use providers::{HttpModelClient, MockModelClient};
pub use retrieval::{Retriever, Snippet, StoreRetriever};
pub use tools::{ToolHandler, ToolOutcome, ToolRegistry};
