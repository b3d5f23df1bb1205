use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ModelConfig, RepairConfig};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient, LLMError};

use super::prompt::{PromptBuilder, PromptBuilderConfig};
use super::session::SessionContext;
use super::store::RepairStore;
use super::tools::{REPLY_TOOL_NAME, ReplyArgs, ToolOutcome, ToolRegistry};

/// One executed tool call, in order, kept for the caller's audit log.
/// The terminal reply is not a record; it is returned separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    pub outcome: ToolOutcome,
}

/// What one repair session produced. `terminal_reply` is None when the step
/// budget ran out before the decision maker chose to reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub terminal_reply: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Session-level failures. Tool-level failures never appear here; they are
/// fed back to the decision maker as conversation data.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("decision maker failed: {0}")]
    Llm(#[from] LLMError),
}

/// Drives one step-bounded repair conversation: build the prompt, let the
/// decision maker pick a tool, execute it, feed the result back, and repeat
/// until it replies or the budget runs out.
pub struct RepairAgent {
    llm: Arc<dyn LLMClient>,
    store: Arc<dyn RepairStore>,
    model: ModelConfig,
    repair: RepairConfig,
}

impl RepairAgent {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        store: Arc<dyn RepairStore>,
        model: ModelConfig,
        repair: RepairConfig,
    ) -> Self {
        Self {
            llm,
            store,
            model,
            repair,
        }
    }

    pub async fn run(&self, session: &SessionContext) -> Result<RepairOutcome, RepairError> {
        let registry = ToolRegistry::for_session(session);
        let prompt_builder = PromptBuilder::with_config(PromptBuilderConfig {
            max_body_length: Some(self.repair.max_body_length),
            max_subject_length: Some(self.repair.max_subject_length),
        });

        let mut messages = prompt_builder.build(session);
        let tools = registry.definitions().to_vec();
        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();

        for step in 0..self.repair.max_steps {
            let request = CompletionRequest {
                messages: messages.clone(),
                temperature: self.model.temperature,
                max_tokens: self.model.max_output_tokens,
                tools: tools.clone(),
            };

            // The only suspension point. A transport failure here fails the
            // whole session; nothing is retried.
            let response = self.llm.complete(request).await?;

            let Some(call) = response.tool_calls.first() else {
                let text = response.content.trim();
                if !text.is_empty() {
                    // Terminal free-text reply.
                    info!(step, "repair session ended with a free-text reply");
                    return Ok(RepairOutcome {
                        terminal_reply: Some(text.to_string()),
                        tool_calls,
                    });
                }

                debug!(step, "empty completion; asking for a tool call");
                messages.push(ChatMessage::user(
                    "Respond by calling one of the available tools, or call `reply` to finish.",
                ));
                continue;
            };

            if response.tool_calls.len() > 1 {
                warn!(
                    step,
                    extra = response.tool_calls.len() - 1,
                    "decision maker returned multiple tool calls; executing the first"
                );
            }

            if call.fn_name == REPLY_TOOL_NAME {
                let content = serde_json::from_value::<ReplyArgs>(call.fn_arguments.clone())
                    .map(|args| args.content)
                    .unwrap_or_else(|_| response.content.clone());
                info!(step, "repair session ended with the reply tool");
                return Ok(RepairOutcome {
                    terminal_reply: Some(content),
                    tool_calls,
                });
            }

            let outcome = registry
                .execute(
                    &call.fn_name,
                    session,
                    self.store.as_ref(),
                    call.fn_arguments.clone(),
                )
                .await;

            debug!(
                step,
                tool = %call.fn_name,
                success = outcome.is_success(),
                "executed repair tool"
            );

            messages.push(ChatMessage::assistant(
                serde_json::json!({
                    "tool": call.fn_name,
                    "arguments": call.fn_arguments,
                })
                .to_string(),
            ));
            messages.push(ChatMessage::user(format!(
                "TOOL RESULT ({}): {}",
                call.fn_name,
                outcome.to_json()
            )));

            tool_calls.push(ToolCallRecord {
                tool: call.fn_name.clone(),
                arguments: call.fn_arguments.clone(),
                outcome,
            });
        }

        // Budget exhausted without a terminal reply. Not an error: the
        // caller still gets the full tool-call log.
        info!(
            max_steps = self.repair.max_steps,
            executed = tool_calls.len(),
            "repair session exhausted its step budget"
        );
        Ok(RepairOutcome {
            terminal_reply: None,
            tool_calls,
        })
    }
}
