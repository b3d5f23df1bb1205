pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod store;
pub mod tools;

pub use orchestrator::{RepairAgent, RepairError, RepairOutcome, ToolCallRecord};
pub use prompt::{PromptBuilder, PromptBuilderConfig};
pub use session::{EmailMessage, SessionContext, SessionLoadError, UserProfile};
pub use store::{LibsqlRepairStore, RepairStore, StoreError};
pub use tools::{REPLY_TOOL_NAME, ToolOutcome, ToolRegistry};
