//! Tools the bot's model can call

mod classify;
mod forward;
mod reply;
mod reset;
mod search;

pub use classify::ClassifyTool;
pub use forward::ForwardTool;
pub use reply::ReplyTool;
pub use reset::ResetTool;
pub use search::SearchTool;

use std::sync::Arc;

use chatbot_agent::{BoxedTool, SearchScopeClassifier};

use crate::backend::ChatBackend;

/// Every tool the bot registers
pub fn all(
    backend: Arc<dyn ChatBackend>,
    classifier: Arc<SearchScopeClassifier>,
) -> Vec<BoxedTool> {
    vec![
        Arc::new(ReplyTool::new(backend.clone())),
        Arc::new(SearchTool::new(backend.clone())),
        Arc::new(ForwardTool::new(backend)),
        Arc::new(ClassifyTool::new(classifier)),
        Arc::new(ResetTool),
    ]
}
