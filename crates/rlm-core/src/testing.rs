//! Test fixtures (§10.4).
//!
//! An enhanced scripted backend and response-builder helpers, reachable from
//! `rlm-tests` and from other crates' test code. Generalizes the teacher's
//! `testing::mock_backend::MockLLMBackend` (queue-of-responses, captured
//! requests, simulated latency, builder-style construction) to this core's
//! `CompletionResult`/`Message` types; `backend::MockBackend` stays the
//! minimal version used by this crate's own unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::LLMBackend;
use crate::error::{Result, RlmError};
use crate::types::{CompletionOptions, CompletionResult, FinishReason, Message, Usage};

/// A richer scripted backend for integration tests: queued responses,
/// captured request history, and optional simulated latency.
#[derive(Debug)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<CompletionResult>>,
    requests: Mutex<Vec<Vec<Message>>>,
    latency: Option<Duration>,
    name: String,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            latency: None,
            name: "scripted".to_string(),
        }
    }

    pub fn with_response(self, response: CompletionResult) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_responses(self, responses: Vec<CompletionResult>) -> Self {
        self.responses.lock().unwrap().extend(responses);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn captured_requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Panics if the request count doesn't match - a convenience for tests
    /// that want a readable assertion failure.
    pub fn assert_request_count(&self, expected: usize) {
        let actual = self.request_count();
        assert_eq!(actual, expected, "expected {expected} requests, got {actual}");
    }

    pub fn last_request(&self) -> Option<Vec<Message>> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn remaining_responses(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMBackend for ScriptedBackend {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<CompletionResult> {
        self.requests.lock().unwrap().push(messages.to_vec());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RlmError::Llm("ScriptedBackend: no more responses queued".to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Response builders for common shapes, so test setup reads as a script of
/// what the model "says" rather than a pile of struct literals.
pub mod fixtures {
    use super::*;

    pub fn text_response(text: impl Into<String>) -> CompletionResult {
        CompletionResult {
            content: text.into(),
            thinking: None,
            usage: Usage::new(10, 10),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn code_response(code: impl Into<String>) -> CompletionResult {
        text_response(format!("```javascript\n{}\n```", code.into()))
    }

    pub fn final_response(answer: impl Into<String>) -> CompletionResult {
        text_response(format!("FINAL(\"{}\")", answer.into()))
    }

    pub fn final_var_response(variable: impl Into<String>) -> CompletionResult {
        text_response(format!("FINAL_VAR(\"{}\")", variable.into()))
    }

    pub fn code_then_final(code: impl Into<String>, answer: impl Into<String>) -> CompletionResult {
        text_response(format!(
            "```javascript\n{}\n```\nFINAL(\"{}\")",
            code.into(),
            answer.into()
        ))
    }

    /// Code that binds `identifier`, followed by a bare (unquoted)
    /// `FINAL(identifier)` - the model never quotes its own variable name.
    pub fn code_then_final_bare_ident(
        code: impl Into<String>,
        identifier: impl Into<String>,
    ) -> CompletionResult {
        text_response(format!(
            "```javascript\n{}\n```\nFINAL({})",
            code.into(),
            identifier.into()
        ))
    }
}
