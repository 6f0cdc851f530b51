//! Gateway HTTP server over the switchboard

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde_json::{Value, json};
use switchyard_core::{EventBus, RecentEvents, RouteDecision, Switchboard};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{
    ApiError, AutoRequest, ParallelRequest, PromptRequest, RunRequest, RunResponse,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared state for all requests
#[derive(Clone)]
pub struct GatewayState {
    pub switchboard: Arc<Switchboard>,
    pub recent: Arc<RecentEvents>,
    pub events: EventBus,
    pub start_time: Instant,
    pub request_timeout: Duration,
}

pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    /// `recent` and `events` should also be among the switchboard's sinks so
    /// `/telemetry` and `/events` see its dispatches
    pub fn new(
        bind: SocketAddr,
        switchboard: Arc<Switchboard>,
        recent: Arc<RecentEvents>,
        events: EventBus,
    ) -> Self {
        let state = GatewayState {
            switchboard,
            recent,
            events,
            start_time: Instant::now(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };
        Self { state, bind }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.state.request_timeout = timeout;
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/agents", get(agents_handler))
            .route("/status", get(status_handler))
            .route("/telemetry", get(telemetry_handler))
            .route("/events", get(events_handler))
            .route("/run", post(run_handler))
            .route("/run/auto", post(run_auto_handler))
            .route("/prompt", post(prompt_handler))
            .route("/run_parallel", post(run_parallel_handler))
            .route("/reload", post(reload_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        info!("Gateway stopped");
        Ok(())
    }

    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

/// Run `fut` on its own task under the end-to-end request budget. The task
/// is not cancelled when the budget runs out or the client disconnects.
async fn within_budget<T, F>(state: &GatewayState, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(fut);
    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!("Request task failed: {}", e);
            Err(ApiError::Internal(format!("Request task failed: {}", e)))
        }
        Err(_) => {
            warn!(
                "Request exceeded {:?}, agent left running",
                state.request_timeout
            );
            Err(ApiError::Timeout(state.request_timeout.as_secs()))
        }
    }
}

/// Rewrite applied before dispatch, as reported to callers
fn orchestration_details(original: &str, decision: &RouteDecision) -> Value {
    json!({
        "original_prompt": original,
        "rewritten_prompt": decision.rewritten_prompt,
        "pattern_type": decision.pattern_type,
        "confidence": decision.confidence,
        "suggested_agents": decision.suggested_agents,
        "decision_source": decision.source,
    })
}

// ── Read-only endpoints ──

async fn root_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "service": "switchyard-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "agents_loaded": state.switchboard.registry().len(),
        "endpoints": [
            "GET /agents", "GET /status", "GET /telemetry", "GET /events",
            "POST /run", "POST /run/auto", "POST /prompt", "POST /run_parallel", "POST /reload",
        ],
    }))
}

async fn agents_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let agents = state.switchboard.list_agents();
    Json(json!({
        "total": agents.len(),
        "agents": agents,
        "system_capabilities": state.switchboard.registry().system_capabilities(),
    }))
}

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let router = state.switchboard.router();
    let rewrite_service = match router.client() {
        Some(client) => json!({
            "url": client.base_url(),
            "healthy": client.health().await,
        }),
        None => json!(null),
    };
    let registry = state.switchboard.registry();

    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "agents": registry.len(),
        "load_report": registry.last_report(),
        "confidence_threshold": router.threshold(),
        "rewrite_service": rewrite_service,
        "fanout": state.switchboard.fanout_config(),
        "event_subscribers": state.events.subscriber_count(),
    }))
}

async fn telemetry_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "stats": state.recent.stats(),
        "recent": state.recent.snapshot(),
    }))
}

/// Server-sent stream of dispatch events
async fn events_handler(
    State(state): State<GatewayState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .event("dispatch")
                        .json_data(&event)
                        .unwrap_or_else(|_| Event::default().comment("unserializable event"));
                    return Some((Ok(sse), rx));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Event stream lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Invocation endpoints ──

async fn run_handler(
    State(state): State<GatewayState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let started = Instant::now();
    let switchboard = state.switchboard.clone();
    let orchestrate = req.use_prompt_orchestrator;
    let original = req.input.clone();
    let run = within_budget(&state, async move {
        switchboard
            .run_agent(&req.agent, &req.input, &req.context, orchestrate)
            .await
            .map_err(ApiError::from)
    })
    .await?;

    let details = json!({
        "prompt_orchestrator_used": orchestrate,
        "orchestrator": run.decision.as_ref().map(|d| orchestration_details(&original, d)),
    });

    Ok(Json(RunResponse {
        request_id: Uuid::new_v4().to_string(),
        agent: run.agent,
        output: run.result.output_text,
        raw: run.result.raw,
        details: Some(details),
        execution_time: started.elapsed().as_secs_f64(),
        timestamp: chrono::Utc::now(),
    }))
}

async fn run_auto_handler(
    State(state): State<GatewayState>,
    Json(req): Json<AutoRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let started = Instant::now();
    let switchboard = state.switchboard.clone();
    let routed = within_budget(&state, async move {
        switchboard
            .route_and_dispatch(&req.input)
            .await
            .map_err(ApiError::from)
    })
    .await?;

    let details = json!({
        "rewritten_prompt": routed.rewritten_prompt,
        "pattern_type": routed.decision.pattern_type,
        "confidence": routed.decision.confidence,
        "decision_source": routed.decision.source,
        "selection": routed.selection,
    });

    Ok(Json(RunResponse {
        request_id: Uuid::new_v4().to_string(),
        agent: routed.agent,
        output: routed.output,
        raw: routed.result.raw,
        details: Some(details),
        execution_time: started.elapsed().as_secs_f64(),
        timestamp: chrono::Utc::now(),
    }))
}

async fn prompt_handler(
    State(state): State<GatewayState>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let started = Instant::now();
    let switchboard = state.switchboard.clone();
    let orchestrate = req.use_prompt_orchestrator;
    let original = req.input.clone();
    let outcome = within_budget(&state, async move {
        switchboard
            .handle_prompt_with(&req.input, req.agent_preference.as_deref(), orchestrate)
            .await
            .map_err(ApiError::from)
    })
    .await?;

    let details = json!({
        "prompt_orchestrator_used": orchestrate,
        "recommendation": outcome.recommendation,
        "orchestrator": outcome.decision.as_ref().map(|d| orchestration_details(&original, d)),
    });

    Ok(Json(RunResponse {
        request_id: Uuid::new_v4().to_string(),
        agent: outcome.agent,
        output: outcome.output,
        raw: outcome.result.raw,
        details: Some(details),
        execution_time: started.elapsed().as_secs_f64(),
        timestamp: chrono::Utc::now(),
    }))
}

async fn run_parallel_handler(
    State(state): State<GatewayState>,
    Json(req): Json<ParallelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let switchboard = state.switchboard.clone();
    let agents = req.agents.clone();
    let result = within_budget(&state, async move {
        switchboard
            .run_parallel_with(&req.input, &req.agents, req.use_evaluator)
            .await
            .map_err(ApiError::from)
    })
    .await?;

    Ok(Json(json!({
        "request_id": Uuid::new_v4().to_string(),
        "agents": agents,
        "result": result,
        "timestamp": chrono::Utc::now(),
    })))
}

async fn reload_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let report = state.switchboard.reload().await;
    info!("Registry reloaded via gateway: {} agents", report.loaded);
    Json(json!({ "status": "reloaded", "report": report }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::agents::builtin::register_builtins;
    use switchyard_core::{
        AgentContext, AgentHandler, AgentOutput, AgentRegistry, EventSink, FanOutConfig,
        HandlerCapabilities, HandlerCatalog, PromptRouter, RegistryConfig,
    };

    struct Sleepy;

    #[async_trait::async_trait]
    impl AgentHandler for Sleepy {
        async fn invoke(&self, _input: &str, _context: &AgentContext) -> anyhow::Result<AgentOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(AgentOutput::from("too late"))
        }
    }

    /// Outlasts a short request budget but finishes soon after
    struct Lingering;

    #[async_trait::async_trait]
    impl AgentHandler for Lingering {
        async fn invoke(&self, _input: &str, _context: &AgentContext) -> anyhow::Result<AgentOutput> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(AgentOutput::from("finished late"))
        }
    }

    /// Scores only `feedback_amplifier` candidates
    struct Judge;

    #[async_trait::async_trait]
    impl AgentHandler for Judge {
        async fn invoke(&self, _input: &str, context: &AgentContext) -> anyhow::Result<AgentOutput> {
            let favored = context.get("candidate_agent").and_then(|v| v.as_str()) == Some("feedback_amplifier");
            Ok(AgentOutput::from(if favored { "1" } else { "0" }))
        }
    }

    const MANIFEST: &str = r#"{
        "agents": {
            "vp_design": {"role": "VP of Design"},
            "evaluator": {"role": "Evaluator"},
            "feedback_amplifier": {"role": "Amplifier"},
            "broken_agent": {"role": "Always fails"},
            "sleepy": {"role": "Slow"},
            "lingering": {"role": "Slightly slow"},
            "judge": {"role": "Judge"}
        },
        "system_capabilities": {"fan_out": true}
    }"#;

    async fn start(timeout: Duration) -> (String, tempfile::TempDir, CancellationToken) {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = tmp.path().join("agent_manifest.json");
        std::fs::write(&manifest, MANIFEST).unwrap();

        let mut catalog = HandlerCatalog::new()
            .with("BrokenAgentAgent", |_| {
                Ok(HandlerCapabilities::new("Broken").with_callable(|_| Err(anyhow::anyhow!("wires crossed"))))
            })
            .with("SleepyAgent", |_| {
                Ok(HandlerCapabilities::new("Sleepy").with_async(Arc::new(Sleepy)))
            })
            .with("LingeringAgent", |_| {
                Ok(HandlerCapabilities::new("Lingering").with_async(Arc::new(Lingering)))
            })
            .with("JudgeAgent", |_| {
                Ok(HandlerCapabilities::new("Judge").with_async(Arc::new(Judge)))
            });
        register_builtins(&mut catalog);
        catalog.set_fallback(switchyard_core::agents::builtin::persona_factory);

        let registry = Arc::new(AgentRegistry::load(
            RegistryConfig::new(manifest, tmp.path().join("plugins")),
            catalog,
        ));
        let recent = Arc::new(RecentEvents::new(32));
        let events = EventBus::new(32);
        let sinks: Vec<Arc<dyn EventSink>> = vec![recent.clone() as Arc<dyn EventSink>, Arc::new(events.clone())];
        let switchboard = Arc::new(Switchboard::new(
            registry,
            PromptRouter::heuristic(0.7),
            FanOutConfig {
                evaluator: Some("judge".to_string()),
                ..Default::default()
            },
            sinks,
        ));

        let server = GatewayServer::new("127.0.0.1:0".parse().unwrap(), switchboard, recent, events)
            .with_request_timeout(timeout);
        let router = server.router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let shutdown = token.clone();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .unwrap();
        });
        (format!("http://{}", addr), tmp, token)
    }

    async fn post(url: &str, body: Value) -> (reqwest::StatusCode, Value) {
        let resp = reqwest::Client::new().post(url).json(&body).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(url: &str) -> Value {
        reqwest::get(url).await.unwrap().json().await.unwrap()
    }

    #[tokio::test]
    async fn test_agents_and_status() {
        let (url, _tmp, token) = start(Duration::from_secs(60)).await;
        let agents = get(&format!("{}/agents", url)).await;
        assert_eq!(agents["total"], 7);
        assert_eq!(agents["agents"]["vp_design"]["role"], "VP of Design");
        assert_eq!(agents["agents"]["vp_design"]["kind"], "PersonaAgent");
        assert_eq!(agents["system_capabilities"]["fan_out"], true);

        let status = get(&format!("{}/status", url)).await;
        assert_eq!(status["status"], "ok");
        assert_eq!(status["agents"], 7);
        assert!(status["rewrite_service"].is_null());
        token.cancel();
    }

    #[tokio::test]
    async fn test_run_and_errors() {
        let (url, _tmp, token) = start(Duration::from_secs(60)).await;

        let (status, body) = post(
            &format!("{}/run", url),
            json!({"agent": "vp_design", "input": "Sketch a dashboard"}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["output"], "[VP of Design] Sketch a dashboard");
        assert_eq!(body["raw"]["role"], "VP of Design");
        assert!(body["request_id"].as_str().is_some());

        let (status, body) = post(&format!("{}/run", url), json!({"agent": "ghost", "input": "x"})).await;
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
        assert!(body["available"].as_array().unwrap().len() == 7);

        let (status, body) = post(
            &format!("{}/run", url),
            json!({"agent": "broken_agent", "input": "x"}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["agent"], "broken_agent");
        assert_eq!(body["fallback"], "error_handling");
        assert!(body["error"].as_str().unwrap().contains("wires crossed"));

        let telemetry = get(&format!("{}/telemetry", url)).await;
        assert_eq!(telemetry["stats"]["total"], 2);
        assert_eq!(telemetry["stats"]["failures"], 1);
        token.cancel();
    }

    #[tokio::test]
    async fn test_auto_and_prompt() {
        let (url, _tmp, token) = start(Duration::from_secs(60)).await;

        let (status, body) = post(
            &format!("{}/run/auto", url),
            json!({"input": "Design a mobile app for Bitcoin trading"}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["agent"], "vp_design");
        assert_eq!(body["details"]["pattern_type"], "design_focused");
        assert_eq!(body["details"]["decision_source"], "heuristic");

        let (_, body) = post(&format!("{}/prompt", url), json!({"input": "Critique this flow"})).await;
        assert_eq!(body["agent"], "evaluator");
        assert_eq!(body["details"]["recommendation"]["primary"], "evaluator");

        let (_, body) = post(
            &format!("{}/prompt", url),
            json!({"input": "Critique this flow", "agent_preference": "feedback_amplifier"}),
        )
        .await;
        assert_eq!(body["agent"], "feedback_amplifier");
        token.cancel();
    }

    #[tokio::test]
    async fn test_run_parallel() {
        let (url, _tmp, token) = start(Duration::from_secs(60)).await;

        let (status, body) = post(
            &format!("{}/run_parallel", url),
            json!({"agents": ["broken_agent", "evaluator", "feedback_amplifier"], "input": "Critique this flow"}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::OK);
        let results = body["result"]["all_results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0]["result"]["output_text"].as_str().unwrap().starts_with("Error: "));
        assert_eq!(body["result"]["top_agent"], "feedback_amplifier");
        assert_eq!(body["result"]["evaluations"]["feedback_amplifier"], 1.0);

        let (status, body) = post(
            &format!("{}/run_parallel", url),
            json!({
                "agents": ["broken_agent", "evaluator", "feedback_amplifier"],
                "input": "Critique this flow",
                "use_evaluator": false
            }),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["result"]["top_agent"], "evaluator");
        assert!(body["result"]["evaluations"].as_object().unwrap().is_empty());

        let (status, _) = post(
            &format!("{}/run_parallel", url),
            json!({"agents": ["evaluator", "ghost"], "input": "x"}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

        let (status, _) = post(&format!("{}/run_parallel", url), json!({"agents": [], "input": "x"})).await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

        let (status, _) = post(
            &format!("{}/run_parallel", url),
            json!({"agents": ["evaluator", "evaluator"], "input": "x"}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
        token.cancel();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (url, _tmp, token) = start(Duration::from_millis(200)).await;
        let (status, body) = post(&format!("{}/run", url), json!({"agent": "sleepy", "input": "x"})).await;
        assert_eq!(status, reqwest::StatusCode::GATEWAY_TIMEOUT);
        assert!(body["error"].as_str().unwrap().contains("timed out"));
        token.cancel();
    }

    #[tokio::test]
    async fn test_timed_out_agent_still_completes() {
        let (url, _tmp, token) = start(Duration::from_millis(200)).await;
        let (status, _) = post(&format!("{}/run", url), json!({"agent": "lingering", "input": "x"})).await;
        assert_eq!(status, reqwest::StatusCode::GATEWAY_TIMEOUT);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let telemetry = get(&format!("{}/telemetry", url)).await;
        assert_eq!(telemetry["stats"]["total"], 1);
        assert_eq!(telemetry["stats"]["failures"], 0);
        assert_eq!(telemetry["recent"][0]["agent"], "lingering");
        assert_eq!(telemetry["recent"][0]["output_text"], "finished late");
        token.cancel();
    }

    #[tokio::test]
    async fn test_prompt_orchestrator_toggle() {
        let (url, _tmp, token) = start(Duration::from_secs(60)).await;

        let (status, body) = post(
            &format!("{}/run", url),
            json!({"agent": "vp_design", "input": "Design a dashboard"}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["output"], "[VP of Design] Design a dashboard");
        assert_eq!(body["details"]["prompt_orchestrator_used"], true);
        let orchestrator = &body["details"]["orchestrator"];
        assert_eq!(orchestrator["original_prompt"], "Design a dashboard");
        assert_eq!(orchestrator["rewritten_prompt"], "Design a dashboard");
        assert_eq!(orchestrator["pattern_type"], "design_focused");
        assert_eq!(orchestrator["confidence"], 0.5);
        assert_eq!(orchestrator["suggested_agents"][0], "vp_design");

        let (status, body) = post(
            &format!("{}/run", url),
            json!({"agent": "vp_design", "input": "Design a dashboard", "use_prompt_orchestrator": false}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["details"]["prompt_orchestrator_used"], false);
        assert!(body["details"]["orchestrator"].is_null());

        let (_, body) = post(
            &format!("{}/prompt", url),
            json!({"input": "Design a dashboard", "use_prompt_orchestrator": false}),
        )
        .await;
        assert_eq!(body["agent"], "evaluator");
        assert!(body["details"]["recommendation"].is_null());
        assert!(body["details"]["orchestrator"].is_null());

        let (_, body) = post(&format!("{}/prompt", url), json!({"input": "Design a dashboard"})).await;
        assert_eq!(body["agent"], "vp_design");
        assert_eq!(body["details"]["orchestrator"]["pattern_type"], "design_focused");
        token.cancel();
    }

    #[tokio::test]
    async fn test_reload_picks_up_plugin() {
        let (url, tmp, token) = start(Duration::from_secs(60)).await;
        std::fs::write(
            tmp.path().join("plugins").join("echo.toml"),
            "name = \"echo\"\nkind = \"builtin\"\nhandler = \"EchoAgent\"\n",
        )
        .unwrap();
        let (status, body) = post(&format!("{}/reload", url), json!({})).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["report"]["loaded"], 8);

        let (_, body) = post(&format!("{}/run", url), json!({"agent": "echo", "input": "ping"})).await;
        assert_eq!(body["output"], "ping");
        token.cancel();
    }
}
