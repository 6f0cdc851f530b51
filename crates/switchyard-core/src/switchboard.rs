//! Caller-facing facade
//!
//! One `Switchboard` is built at process start and shared behind an `Arc` by
//! whatever transport sits in front of it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::agents::{AgentInfo, AgentRegistry, LoadReport};
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, FanOutError};
use crate::events::EventSink;
use crate::fanout::{FanOutConfig, FanOutCoordinator};
use crate::router::PromptRouter;
use crate::types::{AgentContext, AgentSelection, FanOutResult, InvocationResult, RouteDecision};

/// Agent used by `handle_prompt` when nothing better is known
pub const DEFAULT_PROMPT_AGENT: &str = "evaluator";

/// Result of routing then dispatching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedOutput {
    pub agent: String,
    pub rewritten_prompt: String,
    pub output: String,
    pub result: InvocationResult,
    pub decision: RouteDecision,
    pub selection: AgentSelection,
}

/// Result of a named-agent run, with the rewrite applied to its input if any
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub agent: String,
    pub result: InvocationResult,
    pub decision: Option<RouteDecision>,
}

/// Result of a prompt with an optional agent preference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOutcome {
    pub agent: String,
    pub output: String,
    pub result: InvocationResult,
    pub recommendation: Option<AgentSelection>,
    pub decision: Option<RouteDecision>,
}

pub struct Switchboard {
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<Dispatcher>,
    router: PromptRouter,
    fanout: FanOutCoordinator,
}

impl Switchboard {
    pub fn new(
        registry: Arc<AgentRegistry>,
        router: PromptRouter,
        fanout: FanOutConfig,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sinks));
        let fanout = FanOutCoordinator::new(dispatcher.clone(), fanout);
        Self {
            registry,
            dispatcher,
            router,
            fanout,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &PromptRouter {
        &self.router
    }

    pub fn fanout_config(&self) -> &FanOutConfig {
        self.fanout.config()
    }

    pub fn list_agents(&self) -> BTreeMap<String, AgentInfo> {
        self.registry.agents_info()
    }

    /// Dispatch and keep the full normalized result
    pub async fn invoke(
        &self,
        name: &str,
        input: &str,
        context: &AgentContext,
    ) -> Result<InvocationResult, DispatchError> {
        self.dispatcher.dispatch(name, input, context).await
    }

    /// Dispatch and return the canonical output text
    pub async fn dispatch(
        &self,
        name: &str,
        input: &str,
        context: &AgentContext,
    ) -> Result<String, DispatchError> {
        Ok(self.invoke(name, input, context).await?.output_text)
    }

    /// Invoke `name`, first rewriting `input` through the router when
    /// `rewrite` is set. An unknown name fails before the router is asked.
    pub async fn run_agent(
        &self,
        name: &str,
        input: &str,
        context: &AgentContext,
        rewrite: bool,
    ) -> Result<AgentRun, DispatchError> {
        self.dispatcher.resolve(name)?;

        let decision = if rewrite {
            let decision = self.router.route_with_context(input, Some(context)).await;
            if decision.rewritten_prompt != input {
                info!(
                    "Prompt for {} rewritten ({}, {:.2})",
                    name, decision.pattern_type, decision.confidence
                );
            }
            Some(decision)
        } else {
            None
        };
        let final_input = decision
            .as_ref()
            .map_or(input, |d| d.rewritten_prompt.as_str());

        let result = self.dispatcher.dispatch(name, final_input, context).await?;
        Ok(AgentRun {
            agent: name.to_string(),
            result,
            decision,
        })
    }

    /// Route `input`, then invoke the selected agent exactly once
    pub async fn route_and_dispatch(&self, input: &str) -> Result<RoutedOutput, DispatchError> {
        let decision = self.router.route(input).await;
        let selection = self.router.select(&decision);

        let agent = std::iter::once(&selection.primary)
            .chain(selection.alternatives.iter())
            .find(|name| self.registry.contains(name))
            .cloned()
            .ok_or_else(|| DispatchError::UnknownAgentName {
                name: selection.primary.clone(),
                available: self.registry.list(),
            })?;

        if agent != selection.primary {
            warn!(
                "Selected agent {} is not registered, using {}",
                selection.primary, agent
            );
        }
        info!("Routing {} prompt to {}", decision.pattern_type, agent);

        let mut context = AgentContext::new();
        context.insert("original_input".to_string(), Value::String(input.to_string()));
        context.insert(
            "pattern_type".to_string(),
            Value::String(decision.pattern_type.to_string()),
        );

        let result = self
            .dispatcher
            .dispatch(&agent, &decision.rewritten_prompt, &context)
            .await?;

        Ok(RoutedOutput {
            agent,
            rewritten_prompt: decision.rewritten_prompt.clone(),
            output: result.output_text.clone(),
            result,
            decision,
            selection,
        })
    }

    /// [`Self::handle_prompt_with`] with the router consulted
    pub async fn handle_prompt(
        &self,
        input: &str,
        preference: Option<&str>,
    ) -> Result<PromptOutcome, DispatchError> {
        self.handle_prompt_with(input, preference, true).await
    }

    /// Explicit preference wins; otherwise the service recommendation if that
    /// agent exists; otherwise [`DEFAULT_PROMPT_AGENT`]. With `orchestrate`
    /// off no recommendation is asked for and the input is sent unchanged.
    pub async fn handle_prompt_with(
        &self,
        input: &str,
        preference: Option<&str>,
        orchestrate: bool,
    ) -> Result<PromptOutcome, DispatchError> {
        let recommendation = if orchestrate {
            Some(self.router.recommend(input).await)
        } else {
            None
        };

        let agent = match (preference, &recommendation) {
            (Some(p), _) => p.to_string(),
            (None, Some(r)) if self.registry.contains(&r.primary) => r.primary.clone(),
            (None, _) => DEFAULT_PROMPT_AGENT.to_string(),
        };

        let run = self
            .run_agent(&agent, input, &AgentContext::new(), orchestrate)
            .await?;
        Ok(PromptOutcome {
            agent,
            output: run.result.output_text.clone(),
            result: run.result,
            recommendation,
            decision: run.decision,
        })
    }

    pub async fn run_parallel(
        &self,
        input: &str,
        agents: &[String],
    ) -> Result<FanOutResult, FanOutError> {
        self.run_parallel_with(input, agents, true).await
    }

    /// Fan out; with `use_evaluator` off the first success wins unscored
    pub async fn run_parallel_with(
        &self,
        input: &str,
        agents: &[String],
        use_evaluator: bool,
    ) -> Result<FanOutResult, FanOutError> {
        self.fanout
            .run_parallel_with(input, agents, &AgentContext::new(), use_evaluator)
            .await
    }

    /// Rebuild the registry on the blocking pool
    pub async fn reload(&self) -> LoadReport {
        let registry = self.registry.clone();
        match tokio::task::spawn_blocking(move || registry.load_all()).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Registry reload task failed: {}", e);
                self.registry.last_report()
            }
        }
    }
}
