//! LLM adapter interface consumed by the event processor.
//!
//! A chat session is a reusable conversation handle bound to one event: the
//! first send carries the full context, later sends carry deltas. Adapters
//! translate these calls to a concrete provider; the Brain core never talks
//! to a provider directly.

use std::pin::Pin;

use serde::Serialize;

use brain_domain::{Error, Result};

/// A boxed async stream, used for chat streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream chunks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One element of a chat response stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Chunk {
    /// A text fragment.
    #[serde(rename = "text")]
    Text { text: String },

    /// The model is invoking a tool function.
    #[serde(rename = "function_call")]
    FunctionCall {
        name: String,
        args: serde_json::Value,
        tool_use_id: String,
    },

    /// Stream is finished.
    #[serde(rename = "done")]
    Done,
}

/// Sampling parameters passed through to the adapter.
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Port trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter must implement.
///
/// Sessions are created lazily per event and closed when the event closes or
/// the stream errors; they are never retried. `generate` is the stateless
/// fallback used when session streaming fails.
#[async_trait::async_trait]
pub trait ChatPort: Send + Sync {
    /// Open a chat session. Returns the adapter's session id.
    async fn create_chat(&self, system_prompt: &str, params: &ChatParams) -> Result<String>;

    /// Send a user message into a session and stream the response.
    async fn chat_send(
        &self,
        session_id: &str,
        user_message: &str,
    ) -> Result<BoxStream<'static, Result<Chunk>>>;

    /// Feed a tool result back into a session and stream the continuation.
    async fn report_tool_result(
        &self,
        session_id: &str,
        tool_use_id: &str,
        result: &str,
    ) -> Result<BoxStream<'static, Result<Chunk>>>;

    /// Tear down a session. Idempotent; unknown ids are ignored.
    async fn close_chat(&self, session_id: &str);

    /// One-shot stateless completion (full prompt, full response).
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: &ChatParams,
    ) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unconfigured adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Placeholder adapter used when no LLM is wired in. Every call fails with
/// an LLM stream error, which the processor turns into a deferral, so a
/// brain without an adapter idles instead of crashing.
pub struct UnconfiguredChat;

#[async_trait::async_trait]
impl ChatPort for UnconfiguredChat {
    async fn create_chat(&self, _system_prompt: &str, _params: &ChatParams) -> Result<String> {
        Err(Error::LlmStream("no chat adapter configured".into()))
    }

    async fn chat_send(
        &self,
        _session_id: &str,
        _user_message: &str,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        Err(Error::LlmStream("no chat adapter configured".into()))
    }

    async fn report_tool_result(
        &self,
        _session_id: &str,
        _tool_use_id: &str,
        _result: &str,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        Err(Error::LlmStream("no chat adapter configured".into()))
    }

    async fn close_chat(&self, _session_id: &str) {}

    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _params: &ChatParams,
    ) -> Result<String> {
        Err(Error::LlmStream("no chat adapter configured".into()))
    }
}
