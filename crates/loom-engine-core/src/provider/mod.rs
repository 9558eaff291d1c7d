//! # Agent Provider Contract
//!
//! A provider turns a prompt (plus tools, schema, and options) into a
//! lazy, finite stream of [`AgentStreamEvent`]s. The contract is uniform
//! over vendor SDKs and over playback: the runtime consumes the same
//! stream shape whether the events come from a live model or a recording.
//!
//! Stream ordering rules:
//!
//! - `SessionInit`, if emitted, comes first.
//! - Each `*Delta` run may be followed by at most one matching
//!   `*Complete`.
//! - `Stop`, if emitted, precedes the terminal `Result`.
//! - A successful stream ends with exactly one `Result`; a failed stream
//!   ends with an error item instead.
//!
//! Cancellation is cooperative through the [`StreamOptions::cancel`]
//! token; partial deltas already delivered stay valid.

pub mod recorder;
pub mod recording;
pub mod registry;
pub mod scripted;

use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::schema::Schema;

/// Why the model stopped emitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Terminal payload of a successful stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub output: Value,
    pub stop_reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentResult {
    pub fn new(output: Value, stop_reason: StopReason) -> Self {
        Self {
            output,
            stop_reason,
            text: None,
            thinking: None,
            usage: None,
            session_id: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One streamed item from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    TextDelta { delta: String },
    TextComplete { text: String },
    ThinkingDelta { delta: String },
    ThinkingComplete { thinking: String },
    ToolCall {
        tool_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        tool_id: String,
        output: Value,
        is_error: bool,
    },
    Stop { reason: StopReason },
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
    SessionInit { session_id: String },
    Result(AgentResult),
}

impl AgentStreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStreamEvent::Result(_))
    }
}

/// A tool made available to the agent for a single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Options for one provider call.
#[derive(Clone)]
pub struct StreamOptions {
    pub prompt: String,
    pub tools: Vec<ToolDefinition>,
    pub output_schema: Option<Schema>,
    pub provider_options: Option<Value>,
    /// Provider-side conversation to continue, when supported.
    pub resume: Option<String>,
    /// Cooperative cancellation; the provider must abandon the underlying
    /// request when this fires.
    pub cancel: CancellationToken,
}

impl StreamOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tools: Vec::new(),
            output_schema: None,
            provider_options: None,
            resume: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Item type of an agent stream. Provider failures arrive as
/// `CoreError::Provider`; playback misses as `CoreError::RecordingNotFound`.
pub type StreamItem = std::result::Result<AgentStreamEvent, CoreError>;

/// A lazy, finite, restartable-per-call stream of agent events.
pub type AgentStream = Pin<Box<dyn Stream<Item = StreamItem> + Send>>;

/// Uniform streaming interface over model backends. Implementations are
/// stateless and shared; each `stream` call is independent.
pub trait AgentProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Provider configuration that participates in the recording
    /// fingerprint (temperature, model options, …).
    fn config(&self) -> Option<Value> {
        None
    }

    fn stream(&self, options: StreamOptions) -> AgentStream;
}

/// Whether agent calls hit live backends or are served from recordings.
/// Process-scoped: the scaffold fixes the mode at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Live,
    Playback,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Live => f.write_str("live"),
            ExecutionMode::Playback => f.write_str("playback"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(ExecutionMode::Live),
            "playback" => Ok(ExecutionMode::Playback),
            other => Err(format!("unknown execution mode {other:?}")),
        }
    }
}
