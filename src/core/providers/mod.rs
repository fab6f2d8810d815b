pub mod traits;
pub mod types;

pub use traits::{ChatModel, ChatModelFactory};
pub use types::{ChatMessage, ChatResponse, MessageRole, TokenUsage};
