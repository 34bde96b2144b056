//! Language model abstraction.
//!
//! The core never talks to a model backend directly; hosts plug in an
//! implementation of [`LanguageModel`]. [`FakeLanguageModel`] scripts
//! responses for tests.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Model invocation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    #[error("model returned empty response")]
    EmptyResponse,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Text-in, text-out model call
pub trait LanguageModel: Send + Sync {
    fn invoke(&self, messages: &[PromptMessage], temperature: f32) -> Result<String, LlmError>;
}

type Responder = Box<dyn Fn(&[PromptMessage]) -> Result<String, LlmError> + Send + Sync>;

enum Script {
    Queue(Vec<Result<String, LlmError>>),
    Responder(Responder),
}

/// Scripted model for tests
pub struct FakeLanguageModel {
    script: Mutex<Script>,
    calls: Mutex<Vec<Vec<PromptMessage>>>,
}

impl FakeLanguageModel {
    /// Responses are returned in order; the last one repeats
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(Script::Queue(responses)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn always(reply: &str) -> Self {
        Self::replies(&[reply])
    }

    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Compute each reply from the prompt
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&[PromptMessage]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(Script::Responder(Box::new(responder))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Every prompt received, in call order
    pub fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl LanguageModel for FakeLanguageModel {
    fn invoke(&self, messages: &[PromptMessage], _temperature: f32) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let mut script = self
            .script
            .lock()
            .map_err(|_| LlmError::Backend("fake model lock poisoned".to_string()))?;
        match &mut *script {
            Script::Responder(responder) => responder(messages),
            Script::Queue(responses) => match responses.len() {
                0 => Err(LlmError::EmptyResponse),
                1 => responses[0].clone(),
                _ => responses.remove(0),
            },
        }
    }
}
