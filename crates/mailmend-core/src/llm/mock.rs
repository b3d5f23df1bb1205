use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::{CompletionRequest, CompletionResponse, LLMClient, LLMError, ToolCallResult};

/// Scripted decision maker for tests: responses are dequeued in order and
/// every received request is captured for inspection.
#[derive(Debug, Default, Clone)]
pub struct MockLLMClient {
    responses: Arc<Mutex<VecDeque<Result<CompletionResponse, LLMError>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    call_count: Arc<AtomicUsize>,
}

impl MockLLMClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_response(&self, response: Result<CompletionResponse, LLMError>) {
        let mut guard = self.responses.lock().expect("lock responses");
        guard.push_back(response);
    }

    /// Convenience for scripting a single tool invocation step.
    pub fn enqueue_tool_call(&self, fn_name: &str, fn_arguments: Value) {
        self.enqueue_response(Ok(tool_call_response(fn_name, fn_arguments)));
    }

    /// Convenience for scripting a plain-text terminal step.
    pub fn enqueue_text(&self, content: &str) {
        self.enqueue_response(Ok(text_response(content)));
    }

    /// Returns the number of times `complete` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("lock requests").clone()
    }
}

pub fn text_response(content: &str) -> CompletionResponse {
    CompletionResponse {
        content: content.to_string(),
        model: "mock".into(),
        input_tokens: 0,
        output_tokens: 0,
        latency_ms: 0,
        tool_calls: vec![],
    }
}

pub fn tool_call_response(fn_name: &str, fn_arguments: Value) -> CompletionResponse {
    CompletionResponse {
        content: String::new(),
        model: "mock".into(),
        input_tokens: 0,
        output_tokens: 0,
        latency_ms: 0,
        tool_calls: vec![ToolCallResult {
            call_id: format!("call_{fn_name}"),
            fn_name: fn_name.to_string(),
            fn_arguments,
        }],
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock requests").push(request);
        let mut guard = self.responses.lock().expect("lock responses");
        guard.pop_front().unwrap_or_else(|| {
            Err(LLMError::ProviderError(
                "mock response not provided".to_string(),
            ))
        })
    }
}
