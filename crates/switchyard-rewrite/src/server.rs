//! Rewrite/route HTTP service

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use switchyard_core::protocol::{
    AnalyzeRequest, AnalyzeResponse, RewriteRequest, RewriteResponse, RouteRequest, RouteResponse,
};
use switchyard_core::router::select_agents;
use switchyard_core::{DecisionSource, RouteDecision};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::patterns::{PatternAnalyzer, PatternFile, PatternSpec};

/// Below this an analysis is flagged as needing fallback handling
pub const FALLBACK_CONFIDENCE: f64 = 0.7;

#[derive(Clone)]
pub struct RewriteState {
    pub analyzer: Arc<PatternAnalyzer>,
    pub patterns_file: Option<PathBuf>,
    pub start_time: Instant,
}

pub struct RewriteServer {
    state: RewriteState,
    bind: SocketAddr,
}

impl RewriteServer {
    /// Load the pattern table from `patterns_file` when it exists, else the built-in table
    pub fn new(bind: SocketAddr, patterns_file: Option<PathBuf>) -> Self {
        let analyzer = match patterns_file.as_deref().filter(|p| p.exists()) {
            Some(path) => PatternAnalyzer::from_file(path).unwrap_or_else(|e| {
                warn!("Using built-in patterns: {:#}", e);
                PatternAnalyzer::default()
            }),
            None => PatternAnalyzer::default(),
        };
        Self {
            state: RewriteState {
                analyzer: Arc::new(analyzer),
                patterns_file,
                start_time: Instant::now(),
            },
            bind,
        }
    }

    pub fn analyzer(&self) -> &Arc<PatternAnalyzer> {
        &self.state.analyzer
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/rewrite", post(rewrite_handler))
            .route("/route", post(route_handler))
            .route("/analyze", post(analyze_handler))
            .route("/patterns", get(patterns_handler))
            .route("/patterns/update", post(update_patterns_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Rewrite service listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        info!("Rewrite service stopped");
        Ok(())
    }

    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "switchyard-rewrite",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/rewrite - Rewrite a prompt for its detected pattern",
            "/route - Recommend an agent for a prompt",
            "/analyze - Detect pattern and confidence without rewriting",
            "/patterns - Get the pattern table",
            "/patterns/update - Replace the pattern table",
            "/health - Health check",
        ],
    }))
}

async fn health_handler(State(state): State<RewriteState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "patterns": state.analyzer.len(),
        "pattern_registry": state.patterns_file.as_deref().is_some_and(|p| p.exists()),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

async fn rewrite_handler(
    State(state): State<RewriteState>,
    Json(req): Json<RewriteRequest>,
) -> Json<RewriteResponse> {
    let started = Instant::now();
    let analysis = state.analyzer.analyze(&req.prompt);

    let mut suggested = analysis.suggested_agents.clone();
    if let Some(pref) = req.agent_preference.as_deref().filter(|p| !p.is_empty()) {
        suggested.retain(|a| a != pref);
        suggested.insert(0, pref.to_string());
    }

    let rewritten = analysis.rewrite(&req.prompt);
    Json(RewriteResponse {
        original_prompt: req.prompt,
        rewritten_prompt: rewritten,
        pattern_type: analysis.pattern,
        confidence: analysis.confidence,
        suggested_agents: suggested,
        fallback_needed: req.use_fallback && analysis.confidence < FALLBACK_CONFIDENCE,
        execution_time: started.elapsed().as_secs_f64(),
        enhanced_output: None,
    })
}

async fn route_handler(
    State(state): State<RewriteState>,
    Json(req): Json<RouteRequest>,
) -> Json<RouteResponse> {
    let analysis = state.analyzer.analyze(&req.prompt);
    let decision = RouteDecision {
        rewritten_prompt: req.prompt,
        pattern_type: analysis.pattern,
        confidence: analysis.confidence,
        suggested_agents: analysis.suggested_agents,
        source: DecisionSource::Delegated,
    };
    let selection = select_agents(&decision, req.confidence_threshold);
    Json(RouteResponse {
        recommended_agent: selection.primary,
        confidence: selection.confidence,
        alternatives: selection.alternatives,
        reasoning: selection.reasoning,
    })
}

async fn analyze_handler(
    State(state): State<RewriteState>,
    Json(req): Json<AnalyzeRequest>,
) -> Json<AnalyzeResponse> {
    let analysis = state.analyzer.analyze(&req.prompt);
    Json(AnalyzeResponse {
        pattern: analysis.pattern,
        confidence: analysis.confidence,
        fallback_needed: analysis.confidence < FALLBACK_CONFIDENCE,
        suggested_agents: analysis.suggested_agents,
    })
}

async fn patterns_handler(State(state): State<RewriteState>) -> impl IntoResponse {
    let patterns = state.analyzer.patterns();
    Json(json!({
        "total_patterns": patterns.len(),
        "patterns": patterns,
    }))
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

async fn update_patterns_handler(
    State(state): State<RewriteState>,
    Json(body): Json<Value>,
) -> Response {
    let Some(raw) = body.get("patterns").cloned() else {
        return bad_request("Invalid pattern structure");
    };
    let patterns: Vec<PatternSpec> = match serde_json::from_value(raw) {
        Ok(p) => p,
        Err(e) => return bad_request(format!("Invalid pattern structure: {}", e)),
    };

    if let Some(path) = &state.patterns_file {
        let file = PatternFile {
            patterns: patterns.clone(),
        };
        let written = match serde_json::to_string_pretty(&file) {
            Ok(text) => tokio::fs::write(path, text).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            error!("Failed to persist patterns to {}: {}", path.display(), e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Failed to update patterns: {}", e) })),
            )
                .into_response();
        }
    }

    let count = patterns.len();
    state.analyzer.replace(patterns);
    info!("Pattern table replaced ({} patterns)", count);

    Json(json!({ "status": "updated", "patterns_count": count })).into_response()
}
