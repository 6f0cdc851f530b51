//! switchyard-core: agent registry, uniform dispatch, routing and fan-out
//!
//! The pieces compose leaves first: the [`agents::AgentRegistry`] turns a
//! manifest and a plugin directory into handles, the [`dispatch::Dispatcher`]
//! invokes them by name, the [`router::PromptRouter`] picks a target, the
//! [`fanout::FanOutCoordinator`] runs many at once, and the
//! [`switchboard::Switchboard`] ties them together for callers.

pub mod agents;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fanout;
pub mod protocol;
pub mod rewrite_client;
pub mod router;
pub mod switchboard;
pub mod types;

pub use agents::{
    AgentDescriptor, AgentHandle, AgentHandler, AgentInfo, AgentOutput, AgentRegistry,
    CollisionPolicy, HandlerCatalog, HandlerCapabilities, LoadReport, RegistryConfig, SyncAgent,
};
pub use dispatch::Dispatcher;
pub use error::{DispatchError, FanOutError, RegistryError, UpstreamServiceUnavailable};
pub use events::{DispatchEvent, EventBus, EventSink, RecentEvents, TracingSink};
pub use fanout::{FanOutConfig, FanOutCoordinator};
pub use rewrite_client::RewriteClient;
pub use router::{PromptRouter, RouterConfig};
pub use switchboard::{AgentRun, PromptOutcome, RoutedOutput, Switchboard};
pub use types::*;
