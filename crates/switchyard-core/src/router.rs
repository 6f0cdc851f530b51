//! Prompt routing
//!
//! Decides what text an agent receives and which agent receives it. The
//! rewrite/route service is consulted when configured; any failure there
//! degrades to the local keyword heuristic rather than surfacing an error.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::RewriteRequest;
use crate::rewrite_client::{DEFAULT_REWRITE_TIMEOUT, DEFAULT_ROUTE_TIMEOUT, RewriteClient};
use crate::types::{AgentContext, AgentSelection, DecisionSource, PatternType, RouteDecision};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
/// Confidence reported when the service could not be used
pub const DEGRADED_CONFIDENCE: f64 = 0.5;
/// Alternatives offered whenever the threshold is not met
pub const FALLBACK_ALTERNATIVES: [&str; 2] = ["vp_design", "creative_director"];

fn markers(pattern: PatternType) -> &'static [&'static str] {
    match pattern {
        PatternType::Design => &["design", "ui", "ux", "interface", "visual"],
        PatternType::Strategy => &["strategy", "roadmap", "business", "plan"],
        PatternType::Technical => &["code", "technical", "implement", "development"],
        PatternType::Content => &["content", "copy", "text", "narrative"],
        PatternType::Evaluation => &["evaluate", "analyze", "review", "critique"],
        PatternType::General => &[],
    }
}

/// The single agent a category falls back to
pub fn default_agent(pattern: PatternType) -> &'static str {
    match pattern {
        PatternType::Design => "vp_design",
        PatternType::Strategy => "strategy_pilot",
        PatternType::Technical => "design_technologist",
        PatternType::Content => "content_designer",
        PatternType::Evaluation | PatternType::General => "evaluator",
    }
}

/// Ranked specialists for a category
pub fn category_agents(pattern: PatternType) -> &'static [&'static str] {
    match pattern {
        PatternType::Design => &["vp_design", "creative_director", "principal_designer"],
        PatternType::Strategy => &["strategy_pilot", "vp_of_product", "market_analyst"],
        PatternType::Technical => &["design_technologist", "component_librarian"],
        PatternType::Content => &["content_designer", "deck_narrator"],
        PatternType::Evaluation => &["evaluator", "feedback_amplifier"],
        PatternType::General => &["evaluator", "vp_design"],
    }
}

/// Lower-cased word tokens of `input`
fn tokens(input: &str) -> HashSet<String> {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// First category, in priority order, with a word starting with one of its
/// markers, so inflections such as "designing" or "reviewed" count
pub fn classify_heuristic(input: &str) -> PatternType {
    let words = tokens(input);
    PatternType::ALL
        .into_iter()
        .find(|p| {
            markers(*p)
                .iter()
                .any(|m| words.iter().any(|w| w.starts_with(*m)))
        })
        .unwrap_or(PatternType::General)
}

/// Identity rewrite with the heuristic category
pub fn heuristic_decision(input: &str) -> RouteDecision {
    let pattern_type = classify_heuristic(input);
    RouteDecision {
        rewritten_prompt: input.to_string(),
        pattern_type,
        confidence: DEGRADED_CONFIDENCE,
        suggested_agents: category_agents(pattern_type)
            .iter()
            .map(|s| s.to_string())
            .collect(),
        source: DecisionSource::Heuristic,
    }
}

pub fn reasoning(pattern: PatternType, confidence: f64, threshold_met: bool) -> String {
    let tail = if threshold_met {
        "High confidence routing to specialized agents."
    } else {
        "Low confidence, using fallback routing."
    };
    format!(
        "Pattern '{}' detected with {:.2} confidence. {}",
        pattern, confidence, tail
    )
}

/// Apply the confidence gate. Reaching the threshold exactly counts as met.
pub fn select_agents(decision: &RouteDecision, threshold: f64) -> AgentSelection {
    let met = decision.confidence >= threshold;
    match decision.suggested_agents.split_first() {
        Some((primary, rest)) if met => AgentSelection {
            primary: primary.clone(),
            alternatives: rest.iter().take(2).cloned().collect(),
            confidence: decision.confidence,
            reasoning: reasoning(decision.pattern_type, decision.confidence, true),
        },
        _ => AgentSelection {
            primary: default_agent(decision.pattern_type).to_string(),
            alternatives: FALLBACK_ALTERNATIVES.iter().map(|s| s.to_string()).collect(),
            confidence: decision.confidence,
            reasoning: reasoning(decision.pattern_type, decision.confidence, false),
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub service_url: Option<String>,
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub rewrite_timeout_secs: u64,
    pub route_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            enabled: true,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            rewrite_timeout_secs: DEFAULT_REWRITE_TIMEOUT.as_secs(),
            route_timeout_secs: DEFAULT_ROUTE_TIMEOUT.as_secs(),
        }
    }
}

/// Route decisions plus the confidence gate
#[derive(Debug, Clone)]
pub struct PromptRouter {
    client: Option<RewriteClient>,
    threshold: f64,
}

impl PromptRouter {
    pub fn new(config: &RouterConfig) -> Self {
        let client = match (&config.service_url, config.enabled) {
            (Some(url), true) => Some(RewriteClient::new(url.clone()).with_timeouts(
                Duration::from_secs(config.rewrite_timeout_secs),
                Duration::from_secs(config.route_timeout_secs),
            )),
            _ => None,
        };
        Self {
            client,
            threshold: config.confidence_threshold.clamp(0.0, 1.0),
        }
    }

    /// Heuristics only, no service
    pub fn heuristic(threshold: f64) -> Self {
        Self {
            client: None,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn with_client(client: RewriteClient, threshold: f64) -> Self {
        Self {
            client: Some(client),
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_delegating(&self) -> bool {
        self.client.is_some()
    }

    pub fn client(&self) -> Option<&RewriteClient> {
        self.client.as_ref()
    }

    /// Analyze and possibly rewrite `input`. Never fails.
    pub async fn route(&self, input: &str) -> RouteDecision {
        self.route_with_context(input, None).await
    }

    pub async fn route_with_context(&self, input: &str, context: Option<&AgentContext>) -> RouteDecision {
        let Some(client) = &self.client else {
            debug!("Router: no rewrite service, using heuristics");
            return heuristic_decision(input);
        };

        let mut request = RewriteRequest::new(input);
        request.context = context.cloned();

        match client.rewrite(&request).await {
            Ok(resp) => {
                info!(
                    "Router: {} at {:.2} via rewrite service",
                    resp.pattern_type, resp.confidence
                );
                let rewritten_prompt = if resp.rewritten_prompt.trim().is_empty() {
                    input.to_string()
                } else {
                    resp.rewritten_prompt
                };
                RouteDecision {
                    rewritten_prompt,
                    pattern_type: resp.pattern_type,
                    confidence: resp.confidence.clamp(0.0, 1.0),
                    suggested_agents: resp.suggested_agents,
                    source: DecisionSource::Delegated,
                }
            }
            Err(e) => {
                warn!("Router: {}, falling back to heuristics", e);
                heuristic_decision(input)
            }
        }
    }

    /// Apply this router's threshold to a decision
    pub fn select(&self, decision: &RouteDecision) -> AgentSelection {
        select_agents(decision, self.threshold)
    }

    /// Ask the service which agent should take `input`
    pub async fn recommend(&self, input: &str) -> AgentSelection {
        if let Some(client) = &self.client {
            match client.route(input, self.threshold).await {
                Ok(resp) => {
                    return AgentSelection {
                        primary: resp.recommended_agent,
                        alternatives: resp.alternatives,
                        confidence: resp.confidence.clamp(0.0, 1.0),
                        reasoning: resp.reasoning,
                    };
                }
                Err(e) => warn!("Router: recommendation unavailable: {}", e),
            }
        }
        self.select(&heuristic_decision(input))
    }
}
