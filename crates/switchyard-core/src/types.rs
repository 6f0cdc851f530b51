//! Shared types for switchyard-core

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form context passed alongside the input text to every agent
pub type AgentContext = Map<String, Value>;

/// Normalized result of one agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub output_text: String,
    /// Structured payload as returned by the handler, when it returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    /// Set when this result is an error marker from a failed invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvocationResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output_text: output.into(),
            raw: None,
            error: None,
        }
    }

    /// Error marker recorded in place of a failed agent's output
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            output_text: format!("Error: {}", message),
            raw: None,
            error: Some(message),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Topic category detected in a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PatternType {
    Design,
    Strategy,
    Technical,
    Content,
    Evaluation,
    General,
}

impl PatternType {
    /// Categories in heuristic priority order
    pub const ALL: [PatternType; 6] = [
        Self::Design,
        Self::Strategy,
        Self::Technical,
        Self::Content,
        Self::Evaluation,
        Self::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design_focused",
            Self::Strategy => "strategy_focused",
            Self::Technical => "technical_focused",
            Self::Content => "content_focused",
            Self::Evaluation => "evaluation_focused",
            Self::General => "general",
        }
    }

    /// Parse a pattern label; accepts both `design` and `design_focused`.
    /// Anything unrecognised is `General`.
    pub fn from_label(s: &str) -> Self {
        let lower = s.trim().to_lowercase();
        match lower.strip_suffix("_focused").unwrap_or(lower.as_str()) {
            "design" => Self::Design,
            "strategy" => Self::Strategy,
            "technical" => Self::Technical,
            "content" => Self::Content,
            "evaluation" => Self::Evaluation,
            _ => Self::General,
        }
    }
}

impl From<String> for PatternType {
    fn from(s: String) -> Self {
        Self::from_label(&s)
    }
}

impl From<PatternType> for String {
    fn from(p: PatternType) -> Self {
        p.as_str().to_string()
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a route decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Delegated,
    Heuristic,
}

/// Outcome of prompt analysis: the (possibly rewritten) prompt plus routing hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub rewritten_prompt: String,
    pub pattern_type: PatternType,
    pub confidence: f64,
    /// Ranked agent suggestions; empty means "use the pattern default"
    pub suggested_agents: Vec<String>,
    pub source: DecisionSource,
}

/// Agent chosen for a request after applying the confidence gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSelection {
    pub primary: String,
    pub alternatives: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Result of one agent in a fan-out, in requested order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent: String,
    pub result: InvocationResult,
}

/// Aggregate of a fan-out run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutResult {
    pub all_results: Vec<AgentOutcome>,
    pub top_agent: String,
    pub top_result: InvocationResult,
    pub evaluations: BTreeMap<String, f64>,
    pub execution_time_seconds: f64,
}

impl FanOutResult {
    /// Look up one agent's result by name
    pub fn result_for(&self, agent: &str) -> Option<&InvocationResult> {
        self.all_results
            .iter()
            .find(|o| o.agent == agent)
            .map(|o| &o.result)
    }

    pub fn agent_count(&self) -> usize {
        self.all_results.len()
    }
}
