use super::types::{ChatMessage, ChatResponse};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Stateless single-shot completion.
///
/// Used for candidate plans, the judge, patches, sub-agent step plans and
/// summaries. Output is free text; callers extract JSON themselves.
pub trait ChatModel: Send + Sync {
    /// Model identifier for logs (e.g. "gpt-4o-mini").
    fn name(&self) -> &str {
        "chat"
    }

    fn generate<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChatResponse>> + Send + 'a>>;
}

/// Resolves a judge route (endpoint + model name) into a callable model.
pub trait ChatModelFactory: Send + Sync {
    fn resolve(
        &self,
        endpoint: &str,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<Arc<dyn ChatModel>>;
}
