//! Handler capability shapes and the uniform invocation trait
//!
//! Agents come in three shapes: asynchronous two-argument, synchronous
//! two-argument, and plain single-argument callables. The shape is resolved
//! once, when the handle is built, in that fixed precedence; afterwards every
//! handle is invoked through [`AgentHandler`].

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;
use crate::types::AgentContext;

/// Whatever a handler hands back before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Text(String),
    Structured(Value),
}

impl From<String> for AgentOutput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for AgentOutput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Value> for AgentOutput {
    fn from(v: Value) -> Self {
        Self::Structured(v)
    }
}

/// Asynchronous two-argument invocation; the one shape the dispatcher calls
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn invoke(&self, input: &str, context: &AgentContext) -> Result<AgentOutput>;
}

/// Synchronous two-argument invocation, run on the blocking pool
pub trait SyncAgent: Send + Sync + 'static {
    fn run(&self, input: &str, context: &AgentContext) -> Result<AgentOutput>;
}

/// Plain single-argument callable
pub type CallableAgent = dyn Fn(&str) -> Result<AgentOutput> + Send + Sync;

/// Which capability shape a handle was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerShape {
    Async,
    Sync,
    Callable,
}

impl std::fmt::Display for HandlerShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Async => write!(f, "async"),
            Self::Sync => write!(f, "sync"),
            Self::Callable => write!(f, "callable"),
        }
    }
}

/// Where a handle was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentOrigin {
    Manifest,
    Plugin,
}

/// The capability set a factory produces. Any combination of shapes may be
/// present; [`HandlerCapabilities::into_handle`] picks exactly one.
#[derive(Clone, Default)]
pub struct HandlerCapabilities {
    kind: String,
    async_invoke: Option<Arc<dyn AgentHandler>>,
    sync_invoke: Option<Arc<dyn SyncAgent>>,
    callable: Option<Arc<CallableAgent>>,
}

impl std::fmt::Debug for HandlerCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCapabilities")
            .field("kind", &self.kind)
            .field("shape", &self.shape())
            .finish()
    }
}

impl HandlerCapabilities {
    /// Empty capability set; `kind` names the implementation in listings
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_async(mut self, handler: Arc<dyn AgentHandler>) -> Self {
        self.async_invoke = Some(handler);
        self
    }

    pub fn with_sync(mut self, agent: Arc<dyn SyncAgent>) -> Self {
        self.sync_invoke = Some(agent);
        self
    }

    pub fn with_callable<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<AgentOutput> + Send + Sync + 'static,
    {
        self.callable = Some(Arc::new(f));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The shape that will be used: async, then sync, then callable
    pub fn shape(&self) -> Option<HandlerShape> {
        if self.async_invoke.is_some() {
            Some(HandlerShape::Async)
        } else if self.sync_invoke.is_some() {
            Some(HandlerShape::Sync)
        } else if self.callable.is_some() {
            Some(HandlerShape::Callable)
        } else {
            None
        }
    }

    /// Resolve the capability precedence and wrap the chosen shape
    pub fn into_handle(
        self,
        name: impl Into<String>,
        origin: AgentOrigin,
    ) -> std::result::Result<AgentHandle, DispatchError> {
        let name = name.into();
        let (shape, handler): (HandlerShape, Arc<dyn AgentHandler>) =
            if let Some(handler) = self.async_invoke {
                (HandlerShape::Async, handler)
            } else if let Some(agent) = self.sync_invoke {
                (HandlerShape::Sync, Arc::new(BlockingAdapter { agent }))
            } else if let Some(f) = self.callable {
                (HandlerShape::Callable, Arc::new(CallableAdapter { f }))
            } else {
                return Err(DispatchError::UnsupportedHandlerKind { agent: name });
            };

        Ok(AgentHandle {
            name,
            kind: self.kind,
            shape,
            origin,
            handler,
        })
    }
}

/// Runs a synchronous agent on the blocking pool so it never stalls the runtime
struct BlockingAdapter {
    agent: Arc<dyn SyncAgent>,
}

#[async_trait]
impl AgentHandler for BlockingAdapter {
    async fn invoke(&self, input: &str, context: &AgentContext) -> Result<AgentOutput> {
        let agent = self.agent.clone();
        let input = input.to_string();
        let context = context.clone();
        tokio::task::spawn_blocking(move || agent.run(&input, &context))
            .await
            .context("synchronous agent task panicked")?
    }
}

/// Calls a single-argument callable; the context is not passed through
struct CallableAdapter {
    f: Arc<CallableAgent>,
}

#[async_trait]
impl AgentHandler for CallableAdapter {
    async fn invoke(&self, input: &str, _context: &AgentContext) -> Result<AgentOutput> {
        (self.f)(input)
    }
}

/// An instantiated, ready-to-invoke agent owned by the registry
#[derive(Clone)]
pub struct AgentHandle {
    name: String,
    kind: String,
    shape: HandlerShape,
    origin: AgentOrigin,
    handler: Arc<dyn AgentHandler>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("shape", &self.shape)
            .field("origin", &self.origin)
            .finish()
    }
}

impl AgentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn shape(&self) -> HandlerShape {
        self.shape
    }

    pub fn origin(&self) -> AgentOrigin {
        self.origin
    }

    pub(crate) async fn call(&self, input: &str, context: &AgentContext) -> Result<AgentOutput> {
        self.handler.invoke(input, context).await
    }
}
