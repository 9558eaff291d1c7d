//! # Scripted Provider
//!
//! A deterministic provider that answers from a script instead of a model
//! backend. It drives demos, offline runs, and every test that needs a
//! provider with known output. Scripts match on prompt substrings;
//! failure injection and inter-event delays make retry and cancellation
//! paths reachable.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use serde_json::Value;
use tokio::time::sleep;

use crate::error::ProviderError;

use super::{
    AgentProvider, AgentResult, AgentStream, AgentStreamEvent, StopReason, StreamOptions,
    TokenUsage,
};

struct Script {
    matcher: String,
    events: Vec<AgentStreamEvent>,
}

/// Deterministic, data-driven provider.
pub struct ScriptedProvider {
    name: String,
    model: String,
    scripts: Vec<Script>,
    delay: Option<Duration>,
    failures: Arc<AtomicU32>,
    failure: Option<ProviderError>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            scripts: Vec::new(),
            delay: None,
            failures: Arc::new(AtomicU32::new(0)),
            failure: None,
        }
    }

    /// Script the canonical happy path for prompts containing `matcher`:
    /// one text delta rendering `output`, a stop, usage, and the result.
    pub fn respond(self, matcher: impl Into<String>, output: Value) -> Self {
        let text = match &output {
            Value::Object(map) => map
                .values()
                .next()
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| output.to_string()),
            other => other.to_string(),
        };
        let result = AgentResult::new(output, StopReason::EndTurn)
            .with_text(text.clone())
            .with_usage(TokenUsage {
                input_tokens: 12,
                output_tokens: 4,
            });
        let events = vec![
            AgentStreamEvent::TextDelta { delta: text },
            AgentStreamEvent::Stop {
                reason: StopReason::EndTurn,
            },
            AgentStreamEvent::Usage {
                input_tokens: 12,
                output_tokens: 4,
            },
            AgentStreamEvent::Result(result),
        ];
        self.respond_with(matcher, events)
    }

    /// Script an explicit event sequence for prompts containing `matcher`.
    pub fn respond_with(
        mut self,
        matcher: impl Into<String>,
        events: Vec<AgentStreamEvent>,
    ) -> Self {
        self.scripts.push(Script {
            matcher: matcher.into(),
            events,
        });
        self
    }

    /// Sleep between events; makes mid-stream pause/abort reachable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `count` calls with `error` before streaming
    /// normally. Exercises the runtime retry loop.
    pub fn fail_first(mut self, count: u32, error: ProviderError) -> Self {
        self.failures = Arc::new(AtomicU32::new(count));
        self.failure = Some(error);
        self
    }

    fn script_for(&self, prompt: &str) -> Option<Vec<AgentStreamEvent>> {
        self.scripts
            .iter()
            .find(|s| prompt.contains(&s.matcher))
            .map(|s| s.events.clone())
    }
}

impl AgentProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn stream(&self, options: StreamOptions) -> AgentStream {
        let pending_failures = self.failures.clone();
        let failure = self.failure.clone();
        let script = self.script_for(&options.prompt);
        let delay = self.delay;
        let prompt = options.prompt.clone();
        let cancel = options.cancel.clone();

        Box::pin(stream! {
            if let Some(error) = failure {
                if pending_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    yield Err(error.into());
                    return;
                }
            }

            let events = match script {
                Some(events) => events,
                None => {
                    yield Err(ProviderError::fatal(format!(
                        "no script matches prompt {prompt:?}"
                    ))
                    .into());
                    return;
                }
            };

            for event in events {
                if cancel.is_cancelled() {
                    return;
                }
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
                yield Ok(event);
            }
        })
    }
}
