//! Handler catalog: class name to factory
//!
//! The catalog is filled once at process start. The registry resolves each
//! manifest descriptor through it by the descriptor's conventional class name.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use super::handler::HandlerCapabilities;
use super::manifest::AgentDescriptor;

/// Builds the capability set for one descriptor
pub type HandlerFactory =
    Arc<dyn Fn(&AgentDescriptor) -> Result<HandlerCapabilities> + Send + Sync>;

/// Explicit `class_name -> factory` table
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    factories: HashMap<String, HandlerFactory>,
    fallback: Option<HandlerFactory>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a class name, replacing any previous one
    pub fn register<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(&AgentDescriptor) -> Result<HandlerCapabilities> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.into(), Arc::new(factory));
    }

    /// Builder-style [`HandlerCatalog::register`]
    pub fn with<F>(mut self, class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&AgentDescriptor) -> Result<HandlerCapabilities> + Send + Sync + 'static,
    {
        self.register(class_name, factory);
        self
    }

    /// Factory used for descriptors whose class name has no entry
    pub fn set_fallback<F>(&mut self, factory: F)
    where
        F: Fn(&AgentDescriptor) -> Result<HandlerCapabilities> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(factory));
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Sorted class names, for diagnostics
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Exact entry first, then the fallback
    pub fn lookup(&self, class_name: &str) -> Option<HandlerFactory> {
        self.factories
            .get(class_name)
            .cloned()
            .or_else(|| self.fallback.clone())
    }
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("classes", &self.class_names())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
