//! Uniform dispatch over registered agents
//!
//! [`invoke`] runs one handle and normalizes whatever it returns into an
//! [`InvocationResult`]. [`Dispatcher`] adds name resolution against the
//! registry and event emission on top.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error};

use crate::agents::{AgentHandle, AgentOutput, AgentRegistry};
use crate::error::DispatchError;
use crate::events::{DispatchEvent, EventSink};
use crate::types::{AgentContext, InvocationResult};

/// Characters of input shown in failure logs
pub const INPUT_PREVIEW_CHARS: usize = 50;

/// Invoke a handle and normalize its output.
///
/// Failures are logged with the agent name and an input preview, then
/// returned as [`DispatchError::HandlerExecutionError`]. A handler that
/// panics is reported the same way.
pub async fn invoke(
    handle: &AgentHandle,
    input: &str,
    context: &AgentContext,
) -> Result<InvocationResult, DispatchError> {
    let outcome = match AssertUnwindSafe(handle.call(input, context))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => Err(anyhow::anyhow!("agent panicked: {}", panic_message(&*payload))),
    };

    match outcome {
        Ok(output) => Ok(normalize(output)),
        Err(e) => {
            error!(
                "Agent {} failed on input '{}': {:#}",
                handle.name(),
                preview(input),
                e
            );
            Err(DispatchError::HandlerExecutionError {
                agent: handle.name().to_string(),
                source: e.into(),
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `output`, then `enhanced_output`, then the whole payload as JSON
pub fn normalize(output: AgentOutput) -> InvocationResult {
    match output {
        AgentOutput::Text(text) => InvocationResult::text(text),
        AgentOutput::Structured(Value::String(text)) => InvocationResult::text(text),
        AgentOutput::Structured(value) => {
            let output_text = match &value {
                Value::Object(map) => map
                    .get("output")
                    .or_else(|| map.get("enhanced_output"))
                    .map(field_text)
                    .unwrap_or_else(|| value.to_string()),
                other => other.to_string(),
            };
            InvocationResult {
                output_text,
                raw: Some(value),
                error: None,
            }
        }
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First [`INPUT_PREVIEW_CHARS`] characters of `input`
pub fn preview(input: &str) -> String {
    match input.char_indices().nth(INPUT_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &input[..idx]),
        None => input.to_string(),
    }
}

/// Name-based dispatch with event emission
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<AgentRegistry>, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { registry, sinks }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Resolve `name` to a handle without invoking anything
    pub fn resolve(&self, name: &str) -> Result<AgentHandle, DispatchError> {
        self.registry
            .get(name)
            .ok_or_else(|| DispatchError::UnknownAgentName {
                name: name.to_string(),
                available: self.registry.list(),
            })
    }

    /// Invoke the named agent. An unknown name fails before any handler runs.
    pub async fn dispatch(
        &self,
        name: &str,
        input: &str,
        context: &AgentContext,
    ) -> Result<InvocationResult, DispatchError> {
        let handle = self.resolve(name)?;
        debug!("Dispatching to {} ({})", name, handle.shape());

        let result = invoke(&handle, input, context).await;

        let event = match &result {
            Ok(r) => DispatchEvent::success(name, input, &r.output_text),
            Err(DispatchError::HandlerExecutionError { source, .. }) => {
                DispatchEvent::failure(name, input, &source.to_string())
            }
            Err(e) => DispatchEvent::failure(name, input, &e.to_string()),
        };
        self.emit(&event);

        result
    }

    fn emit(&self, event: &DispatchEvent) {
        if self.sinks.is_empty() || !self.registry.telemetry_enabled(&event.agent) {
            return;
        }
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentOrigin, HandlerCapabilities};
    use crate::events::RecentEvents;
    use crate::test_support::registry_with;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_normalize_output_field() {
        let r = normalize(AgentOutput::Structured(json!({"output": "X", "enhanced_output": "Y"})));
        assert_eq!(r.output_text, "X");
        assert_eq!(r.raw, Some(json!({"output": "X", "enhanced_output": "Y"})));
    }

    #[test]
    fn test_normalize_enhanced_output_field() {
        let r = normalize(AgentOutput::Structured(json!({"enhanced_output": "Y"})));
        assert_eq!(r.output_text, "Y");
    }

    #[test]
    fn test_normalize_bare_string_and_fallbacks() {
        assert_eq!(normalize(AgentOutput::from("plain")).output_text, "plain");
        assert_eq!(normalize(AgentOutput::Structured(json!("plain"))).output_text, "plain");
        assert!(normalize(AgentOutput::from("plain")).raw.is_none());

        let r = normalize(AgentOutput::Structured(json!({"output": {"k": 1}})));
        assert_eq!(r.output_text, r#"{"k":1}"#);

        let r = normalize(AgentOutput::Structured(json!({"score": 2})));
        assert_eq!(r.output_text, r#"{"score":2}"#);

        let r = normalize(AgentOutput::Structured(json!([1, 2])));
        assert_eq!(r.output_text, "[1,2]");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(60);
        let p = preview(&long);
        assert_eq!(p.chars().count(), INPUT_PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn test_invoke_wraps_failure() {
        let handle = HandlerCapabilities::new("Failing")
            .with_callable(|_| Err(anyhow::anyhow!("kaput")))
            .into_handle("failing", AgentOrigin::Manifest)
            .unwrap();
        let err = invoke(&handle, "input", &AgentContext::new()).await.unwrap_err();
        match err {
            DispatchError::HandlerExecutionError { agent, source } => {
                assert_eq!(agent, "failing");
                assert_eq!(source.to_string(), "kaput");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_failure() {
        let (_tmp, registry) = registry_with(vec![(
            "volatile",
            HandlerCapabilities::new("Volatile").with_callable(|_| panic!("boom")),
        )]);
        let recent = Arc::new(RecentEvents::new(8));
        let dispatcher = Dispatcher::new(registry, vec![recent.clone() as Arc<dyn EventSink>]);

        let err = dispatcher
            .dispatch("volatile", "input", &AgentContext::new())
            .await
            .unwrap_err();
        match err {
            DispatchError::HandlerExecutionError { agent, source } => {
                assert_eq!(agent, "volatile");
                assert_eq!(source.to_string(), "agent panicked: boom");
            }
            other => panic!("unexpected error {:?}", other),
        }

        let events = recent.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].output_text, "Error: agent panicked: boom");
        assert_eq!(events[0].fallback.as_deref(), Some("error_handling"));
    }

    #[tokio::test]
    async fn test_unknown_name_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (_tmp, registry) = registry_with(vec![(
            "counted",
            HandlerCapabilities::new("Counted").with_callable(move |i| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(AgentOutput::from(i))
            }),
        )]);
        let recent = Arc::new(RecentEvents::new(8));
        let dispatcher = Dispatcher::new(registry, vec![recent.clone() as Arc<dyn EventSink>]);

        let err = dispatcher
            .dispatch("nobody", "hello", &AgentContext::new())
            .await
            .unwrap_err();
        match err {
            DispatchError::UnknownAgentName { name, available } => {
                assert_eq!(name, "nobody");
                assert_eq!(available, vec!["counted"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(recent.stats().total, 0);

        let out = dispatcher
            .dispatch("counted", "hello", &AgentContext::new())
            .await
            .unwrap();
        assert_eq!(out.output_text, "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_emitted_with_fallback_marker() {
        let (_tmp, registry) = registry_with(vec![
            ("ok", HandlerCapabilities::new("Ok").with_callable(|_| Ok(AgentOutput::from("fine")))),
            (
                "bad",
                HandlerCapabilities::new("Bad").with_callable(|_| Err(anyhow::anyhow!("broken"))),
            ),
        ]);
        let recent = Arc::new(RecentEvents::new(8));
        let dispatcher = Dispatcher::new(registry, vec![recent.clone() as Arc<dyn EventSink>]);

        dispatcher.dispatch("ok", "a", &AgentContext::new()).await.unwrap();
        assert!(dispatcher.dispatch("bad", "b", &AgentContext::new()).await.is_err());

        let events = recent.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].output_text, "fine");
        assert!(events[0].fallback.is_none());
        assert_eq!(events[1].fallback.as_deref(), Some("error_handling"));
        assert_eq!(events[1].output_text, "Error: broken");
    }
}
