//! Gateway HTTP protocol: request bodies, responses and error mapping

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use switchyard_core::{AgentContext, DispatchError, FanOutError};

fn default_true() -> bool {
    true
}

/// `POST /run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub agent: String,
    pub input: String,
    #[serde(default)]
    pub context: AgentContext,
    /// Rewrite the input through the router before dispatch
    #[serde(default = "default_true")]
    pub use_prompt_orchestrator: bool,
}

/// `POST /run/auto`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRequest {
    pub input: String,
}

/// `POST /prompt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub input: String,
    #[serde(default)]
    pub agent_preference: Option<String>,
    /// Ask for a recommendation and rewrite the input before dispatch
    #[serde(default = "default_true")]
    pub use_prompt_orchestrator: bool,
}

/// `POST /run_parallel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelRequest {
    pub agents: Vec<String>,
    pub input: String,
    /// Rank candidates with the configured evaluator
    #[serde(default = "default_true")]
    pub use_evaluator: bool,
}

/// Envelope returned by every invocation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub request_id: String,
    pub agent: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    /// Endpoint-specific extras: route decision, recommendation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

/// Every failure the HTTP layer reports
#[derive(Debug)]
pub enum ApiError {
    NotFound { message: String, available: Vec<String> },
    BadRequest(String),
    Execution { agent: String, message: String },
    Timeout(u64),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Execution { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::UnknownAgentName { name, available } => Self::NotFound {
                message: format!("Agent '{}' not found", name),
                available,
            },
            DispatchError::UnsupportedHandlerKind { agent } => Self::Execution {
                message: format!("agent '{}' cannot be invoked", agent),
                agent,
            },
            DispatchError::HandlerExecutionError { agent, source } => Self::Execution {
                agent,
                message: source.to_string(),
            },
        }
    }
}

impl From<FanOutError> for ApiError {
    fn from(e: FanOutError) -> Self {
        match e {
            FanOutError::UnknownAgentName(missing) => Self::NotFound {
                message: format!("Agents not found: {}", missing.join(", ")),
                available: Vec::new(),
            },
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::NotFound { message, available } if available.is_empty() => {
                json!({ "error": message })
            }
            Self::NotFound { message, available } => {
                json!({ "error": message, "available": available })
            }
            Self::BadRequest(message) => json!({ "error": message }),
            Self::Execution { agent, message } => json!({
                "error": format!("Agent execution failed: {}", message),
                "agent": agent,
                "fallback": switchyard_core::events::FALLBACK_ERROR_HANDLING,
            }),
            Self::Timeout(secs) => json!({
                "error": format!("Request timed out after {} seconds", secs),
            }),
            Self::Internal(message) => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let e: ApiError = DispatchError::UnknownAgentName {
            name: "x".to_string(),
            available: vec![],
        }
        .into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);

        let e: ApiError = DispatchError::HandlerExecutionError {
            agent: "a".to_string(),
            source: "bad".into(),
        }
        .into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let e: ApiError = FanOutError::EmptyAgentList.into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        let e: ApiError = FanOutError::DuplicateAgentName("a".to_string()).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        let e: ApiError = FanOutError::UnknownAgentName(vec!["z".to_string()]).into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);

        assert_eq!(ApiError::Timeout(60).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::Internal("task failed".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_run_request_context_optional() {
        let req: RunRequest = serde_json::from_str(r#"{"agent": "a", "input": "b"}"#).unwrap();
        assert!(req.context.is_empty());
        assert!(req.use_prompt_orchestrator);
    }

    #[test]
    fn test_request_flags_default_on() {
        let req: PromptRequest = serde_json::from_str(r#"{"input": "b"}"#).unwrap();
        assert!(req.use_prompt_orchestrator);
        let req: PromptRequest =
            serde_json::from_str(r#"{"input": "b", "use_prompt_orchestrator": false}"#).unwrap();
        assert!(!req.use_prompt_orchestrator);

        let req: ParallelRequest = serde_json::from_str(r#"{"agents": ["a"], "input": "b"}"#).unwrap();
        assert!(req.use_evaluator);
        let req: ParallelRequest =
            serde_json::from_str(r#"{"agents": ["a"], "input": "b", "use_evaluator": false}"#).unwrap();
        assert!(!req.use_evaluator);
    }
}
