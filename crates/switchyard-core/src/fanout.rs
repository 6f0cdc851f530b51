//! Fan-out: one input, many agents, one ranked answer
//!
//! Agents run on their own tasks under a semaphore. A failing or panicking
//! agent yields an error marker in its slot and never disturbs the others.
//! Ranking is done afterwards by an optional evaluator agent.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::FanOutError;
use crate::types::{AgentContext, AgentOutcome, FanOutResult, InvocationResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Agent asked to score each successful candidate
    pub evaluator: Option<String>,
    /// Cap on agents running at once; unset runs every agent at once
    pub max_concurrent: Option<usize>,
}

pub struct FanOutCoordinator {
    dispatcher: Arc<Dispatcher>,
    config: FanOutConfig,
}

impl FanOutCoordinator {
    pub fn new(dispatcher: Arc<Dispatcher>, config: FanOutConfig) -> Self {
        Self { dispatcher, config }
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    fn validate(&self, agents: &[String]) -> Result<(), FanOutError> {
        if agents.is_empty() {
            return Err(FanOutError::EmptyAgentList);
        }
        let mut seen = HashSet::new();
        for name in agents {
            if !seen.insert(name.as_str()) {
                return Err(FanOutError::DuplicateAgentName(name.clone()));
            }
        }
        let registry = self.dispatcher.registry();
        let missing: Vec<String> = agents
            .iter()
            .filter(|name| !registry.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(FanOutError::UnknownAgentName(missing));
        }
        Ok(())
    }

    /// Run `input` against every agent in `agents` concurrently and rank the results
    pub async fn run_parallel(
        &self,
        input: &str,
        agents: &[String],
        context: &AgentContext,
    ) -> Result<FanOutResult, FanOutError> {
        self.run_parallel_with(input, agents, context, true).await
    }

    /// As [`Self::run_parallel`]; with `use_evaluator` off the evaluator is
    /// never consulted and the first success wins
    pub async fn run_parallel_with(
        &self,
        input: &str,
        agents: &[String],
        context: &AgentContext,
        use_evaluator: bool,
    ) -> Result<FanOutResult, FanOutError> {
        self.validate(agents)?;

        let start = Instant::now();
        let limit = self.config.max_concurrent.unwrap_or(agents.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut tasks = Vec::with_capacity(agents.len());
        for name in agents {
            let dispatcher = self.dispatcher.clone();
            let semaphore = semaphore.clone();
            let name = name.clone();
            let input = input.to_string();
            let context = context.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return InvocationResult::failed("fan-out semaphore closed"),
                };
                match dispatcher.dispatch(&name, &input, &context).await {
                    Ok(result) => result,
                    Err(e) => InvocationResult::failed(e.to_string()),
                }
            }));
        }

        let mut all_results = Vec::with_capacity(agents.len());
        for (name, task) in agents.iter().zip(tasks) {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Fan-out task for {} failed: {}", name, e);
                    InvocationResult::failed(format!("agent task failed: {}", e))
                }
            };
            all_results.push(AgentOutcome {
                agent: name.clone(),
                result,
            });
        }

        let execution_time_seconds = start.elapsed().as_secs_f64();
        debug!(
            "Fan-out collected {} results in {:.3}s",
            all_results.len(),
            execution_time_seconds
        );

        let evaluations = if use_evaluator {
            self.evaluate(input, &all_results).await
        } else {
            None
        };
        let top = pick_top(&all_results, evaluations.as_ref());

        let (top_agent, top_result) = match top {
            Some(outcome) => (outcome.agent.clone(), outcome.result.clone()),
            // validate() guarantees at least one result
            None => (String::new(), InvocationResult::failed("no results")),
        };

        info!(
            "Fan-out over {} agents finished, top: {}",
            all_results.len(),
            top_agent
        );

        Ok(FanOutResult {
            all_results,
            top_agent,
            top_result,
            evaluations: evaluations.unwrap_or_default(),
            execution_time_seconds,
        })
    }

    /// Score every successful candidate. `None` when no evaluator is usable.
    async fn evaluate(
        &self,
        original_input: &str,
        outcomes: &[AgentOutcome],
    ) -> Option<BTreeMap<String, f64>> {
        let evaluator = self.config.evaluator.as_deref()?;
        if !self.dispatcher.registry().contains(evaluator) {
            warn!("Evaluator '{}' is not registered, ranking by order", evaluator);
            return None;
        }

        let mut scores = BTreeMap::new();
        for outcome in outcomes.iter().filter(|o| !o.result.is_error()) {
            let mut context = AgentContext::new();
            context.insert(
                "original_input".to_string(),
                Value::String(original_input.to_string()),
            );
            context.insert(
                "candidate_agent".to_string(),
                Value::String(outcome.agent.clone()),
            );

            let score = match self
                .dispatcher
                .dispatch(evaluator, &outcome.result.output_text, &context)
                .await
            {
                Ok(result) => extract_score(&result),
                Err(e) => {
                    warn!("Evaluator failed on {}: {}", outcome.agent, e);
                    0.0
                }
            };
            debug!("Evaluator scored {} at {}", outcome.agent, score);
            scores.insert(outcome.agent.clone(), score);
        }
        Some(scores)
    }
}

/// Payload `score`, else the output parsed as a number, else 0
pub fn extract_score(result: &InvocationResult) -> f64 {
    let score = result
        .raw
        .as_ref()
        .and_then(|raw| raw.get("score"))
        .and_then(Value::as_f64)
        .or_else(|| result.output_text.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    if score.is_finite() { score } else { 0.0 }
}

/// Highest score among successes, earliest on ties; without scores the first
/// success; when everything failed the first error marker
fn pick_top<'a>(
    outcomes: &'a [AgentOutcome],
    scores: Option<&BTreeMap<String, f64>>,
) -> Option<&'a AgentOutcome> {
    let mut successes = outcomes.iter().filter(|o| !o.result.is_error());

    let best = match scores {
        Some(scores) => {
            let score_of = |o: &AgentOutcome| scores.get(&o.agent).copied().unwrap_or(0.0);
            successes.fold(None::<&AgentOutcome>, |best, o| match best {
                Some(b) if score_of(b) >= score_of(o) => Some(b),
                _ => Some(o),
            })
        }
        None => successes.next(),
    };

    best.or_else(|| outcomes.first())
}
