//! Wire types of the rewrite/route service, shared by client and server

use serde::{Deserialize, Serialize};

use crate::types::{AgentContext, PatternType};

pub const DEFAULT_ROUTE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<AgentContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_preference: Option<String>,
    #[serde(default = "default_true")]
    pub use_memory: bool,
    #[serde(default = "default_true")]
    pub use_fallback: bool,
}

impl RewriteRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            agent_preference: None,
            use_memory: true,
            use_fallback: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteResponse {
    pub original_prompt: String,
    pub rewritten_prompt: String,
    pub pattern_type: PatternType,
    pub confidence: f64,
    #[serde(default)]
    pub suggested_agents: Vec<String>,
    #[serde(default)]
    pub fallback_needed: bool,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub prompt: String,
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub recommended_agent: String,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub pattern: PatternType,
    pub confidence: f64,
    pub suggested_agents: Vec<String>,
    pub fallback_needed: bool,
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f64 {
    DEFAULT_ROUTE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: RewriteRequest = serde_json::from_str(r#"{"prompt": "hi"}"#).unwrap();
        assert!(req.use_memory && req.use_fallback);
        assert!(req.context.is_none());

        let req: RouteRequest = serde_json::from_str(r#"{"prompt": "hi"}"#).unwrap();
        assert_eq!(req.confidence_threshold, 0.7);
    }

    #[test]
    fn test_rewrite_response_tolerates_missing_optionals() {
        let resp: RewriteResponse = serde_json::from_str(
            r#"{"original_prompt": "a", "rewritten_prompt": "b", "pattern_type": "design", "confidence": 0.8}"#,
        )
        .unwrap();
        assert_eq!(resp.pattern_type, PatternType::Design);
        assert!(resp.suggested_agents.is_empty());
        assert!(resp.enhanced_output.is_none());
    }
}
