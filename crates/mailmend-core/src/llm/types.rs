use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A callable operation advertised to the model: name, human-readable
/// description, and a JSON schema for its arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: Option<String>,
    pub schema: Option<Value>,
}

impl Tool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tools: Vec<Tool>,
}

/// One tool invocation chosen by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub fn_name: String,
    pub fn_arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    pub tool_calls: Vec<ToolCallResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json, to_value};

    #[test]
    fn chat_role_serializes_to_lowercase() {
        assert_eq!(to_value(ChatRole::System).unwrap(), json!("system"));
        assert_eq!(to_value(ChatRole::User).unwrap(), json!("user"));
        assert_eq!(to_value(ChatRole::Assistant).unwrap(), json!("assistant"));
        assert_eq!(from_str::<ChatRole>("\"user\"").unwrap(), ChatRole::User);
    }

    #[test]
    fn chat_message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("a").role, ChatRole::System);
        assert_eq!(ChatMessage::user("b").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("c").role, ChatRole::Assistant);
        assert_eq!(ChatMessage::user("b").content, "b");
    }

    #[test]
    fn tool_builder_accumulates_fields() {
        let tool = Tool::new("edit_rule")
            .with_description("Edit an existing rule")
            .with_schema(json!({"type": "object"}));

        assert_eq!(tool.name, "edit_rule");
        assert_eq!(tool.description.as_deref(), Some("Edit an existing rule"));
        assert_eq!(tool.schema, Some(json!({"type": "object"})));
    }

    #[test]
    fn completion_response_round_trips_through_json() {
        let response = CompletionResponse {
            content: "ok".to_string(),
            model: "gpt-4o".to_string(),
            input_tokens: 42,
            output_tokens: 7,
            latency_ms: 1234,
            tool_calls: vec![ToolCallResult {
                call_id: "call_1".into(),
                fn_name: "reply".into(),
                fn_arguments: json!({"content": "done"}),
            }],
        };

        let value = to_value(&response).expect("serialize");
        let decoded: CompletionResponse = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, response);
    }
}
