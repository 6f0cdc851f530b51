//! Built-in handlers shipped with the library
//!
//! These cover the plumbing cases: an echo agent for smoke tests, a persona
//! agent that answers in the voice of its manifest role, and a keyword scorer
//! usable as a fan-out evaluator.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::catalog::HandlerCatalog;
use super::handler::{AgentHandler, AgentOutput, HandlerCapabilities, SyncAgent};
use super::manifest::AgentDescriptor;
use crate::types::AgentContext;

pub const ECHO_AGENT: &str = "EchoAgent";
pub const PERSONA_AGENT: &str = "PersonaAgent";
pub const KEYWORD_SCORER_AGENT: &str = "KeywordScorerAgent";

/// Returns its input unchanged
pub struct EchoAgent;

#[async_trait]
impl AgentHandler for EchoAgent {
    async fn invoke(&self, input: &str, _context: &AgentContext) -> Result<AgentOutput> {
        Ok(AgentOutput::Text(input.to_string()))
    }
}

/// Answers with a structured payload tagged with the agent's role
pub struct PersonaAgent {
    name: String,
    role: String,
}

impl PersonaAgent {
    pub fn new(descriptor: &AgentDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            role: descriptor.role.clone(),
        }
    }
}

impl SyncAgent for PersonaAgent {
    fn run(&self, input: &str, _context: &AgentContext) -> Result<AgentOutput> {
        Ok(AgentOutput::Structured(json!({
            "output": format!("[{}] {}", self.role, input),
            "agent": self.name,
            "role": self.role,
        })))
    }
}

/// Scores a candidate by the share of the original input's words it mentions.
/// Expects `original_input` in the context; without it every candidate scores 0.
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn score(original: &str, candidate: &str) -> f64 {
        let wanted: HashSet<String> = words(original).collect();
        if wanted.is_empty() {
            return 0.0;
        }
        let seen: HashSet<String> = words(candidate).collect();
        let hits = wanted.iter().filter(|w| seen.contains(*w)).count();
        hits as f64 / wanted.len() as f64
    }
}

impl SyncAgent for KeywordScorer {
    fn run(&self, input: &str, context: &AgentContext) -> Result<AgentOutput> {
        let original = context
            .get("original_input")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let score = Self::score(original, input);
        Ok(AgentOutput::Structured(json!({
            "output": format!("{:.2}", score),
            "score": score,
        })))
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
}

/// Persona factory, suitable as the catalog fallback
pub fn persona_factory(descriptor: &AgentDescriptor) -> Result<HandlerCapabilities> {
    Ok(HandlerCapabilities::new(PERSONA_AGENT).with_sync(Arc::new(PersonaAgent::new(descriptor))))
}

/// Register the built-in handlers under their class names
pub fn register_builtins(catalog: &mut HandlerCatalog) {
    catalog.register(ECHO_AGENT, |_| {
        Ok(HandlerCapabilities::new(ECHO_AGENT).with_async(Arc::new(EchoAgent)))
    });
    catalog.register(PERSONA_AGENT, persona_factory);
    catalog.register(KEYWORD_SCORER_AGENT, |_| {
        Ok(HandlerCapabilities::new(KEYWORD_SCORER_AGENT).with_sync(Arc::new(KeywordScorer)))
    });
}
