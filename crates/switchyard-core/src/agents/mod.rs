//! Agent discovery, instantiation and the handler contract

pub mod builtin;
pub mod catalog;
pub mod handler;
pub mod manifest;
pub mod plugins;
pub mod registry;

pub use catalog::{HandlerCatalog, HandlerFactory};
pub use handler::{
    AgentHandle, AgentHandler, AgentOrigin, AgentOutput, HandlerCapabilities, HandlerShape,
    SyncAgent,
};
pub use manifest::AgentDescriptor;
pub use registry::{AgentInfo, AgentRegistry, CollisionPolicy, LoadReport, RegistryConfig};
