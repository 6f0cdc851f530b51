//! Agent registry
//!
//! Builds the `name -> AgentHandle` map from the manifest and the plugin
//! directory. The map lives in an immutable snapshot; readers clone the `Arc`
//! and a reload builds a fresh snapshot before swapping it in.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::catalog::HandlerCatalog;
use super::handler::{AgentHandle, AgentOrigin, HandlerShape};
use super::manifest::{AgentDescriptor, load_manifest};
use super::plugins::discover_plugins;
use crate::error::RegistryError;

/// What happens when a plugin declares a name that is already registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Later entry replaces the earlier one, with a warning
    #[default]
    Override,
    /// Earlier entry stays, with a warning
    KeepFirst,
    /// Later entry is dropped and recorded as a failure
    Reject,
}

impl std::fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::KeepFirst => write!(f, "keep-first"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub manifest_path: PathBuf,
    pub plugins_dir: PathBuf,
    pub collision_policy: CollisionPolicy,
}

impl RegistryConfig {
    pub fn new(manifest_path: impl Into<PathBuf>, plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            plugins_dir: plugins_dir.into(),
            collision_policy: CollisionPolicy::default(),
        }
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }
}

/// Listing metadata for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub role: String,
    pub kind: String,
    pub shape: HandlerShape,
    pub origin: AgentOrigin,
    pub capabilities: Vec<String>,
    pub confidence_threshold: f64,
    pub memory_enabled: bool,
    pub telemetry_enabled: bool,
}

/// Summary of the most recent load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub manifest_agents: usize,
    pub plugin_agents: usize,
    pub collisions: Vec<String>,
    pub failures: Vec<String>,
}

impl LoadReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

struct RegisteredAgent {
    descriptor: AgentDescriptor,
    handle: AgentHandle,
}

#[derive(Default)]
struct Snapshot {
    agents: BTreeMap<String, RegisteredAgent>,
    system_capabilities: Map<String, Value>,
    report: LoadReport,
}

/// Name-keyed store of agent handles
pub struct AgentRegistry {
    config: RegistryConfig,
    catalog: HandlerCatalog,
    snapshot: RwLock<Arc<Snapshot>>,
    reload_lock: Mutex<()>,
}

impl AgentRegistry {
    /// Registry with nothing loaded yet
    pub fn new(config: RegistryConfig, catalog: HandlerCatalog) -> Self {
        Self {
            config,
            catalog,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            reload_lock: Mutex::new(()),
        }
    }

    /// Create and run the first load
    pub fn load(config: RegistryConfig, catalog: HandlerCatalog) -> Self {
        let registry = Self::new(config, catalog);
        registry.load_all();
        registry
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Rebuild the agent map from the manifest and plugin directory.
    ///
    /// Never fails: manifest and per-agent problems are logged and collected in
    /// the returned report. Concurrent calls are serialized.
    pub fn load_all(&self) -> LoadReport {
        let _guard = self.reload_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut snapshot = Snapshot::default();
        let mut failures: Vec<RegistryError> = Vec::new();

        match load_manifest(&self.config.manifest_path) {
            Ok(manifest) => {
                failures.extend(manifest.failures);
                snapshot.system_capabilities = manifest.system_capabilities;
                for descriptor in manifest.descriptors {
                    match self.resolve_manifest_agent(&descriptor) {
                        Ok(handle) => {
                            info!("Loaded agent: {} ({})", descriptor.name, handle.kind());
                            snapshot.report.manifest_agents += 1;
                            snapshot
                                .agents
                                .insert(descriptor.name.clone(), RegisteredAgent { descriptor, handle });
                        }
                        Err(e) => failures.push(e),
                    }
                }
            }
            Err(e) => {
                warn!("Agent manifest unavailable, continuing without core agents: {}", e);
            }
        }

        match discover_plugins(&self.config.plugins_dir) {
            Ok(scan) => {
                failures.extend(scan.failures);
                for spec in scan.specs {
                    let handle = match spec
                        .build(&self.catalog)
                        .and_then(|caps| {
                            caps.into_handle(&spec.name, AgentOrigin::Plugin)
                                .map_err(|e| RegistryError::resolution(&spec.name, e))
                        }) {
                        Ok(handle) => handle,
                        Err(e) => {
                            failures.push(e);
                            continue;
                        }
                    };

                    if snapshot.agents.contains_key(&spec.name) {
                        snapshot.report.collisions.push(spec.name.clone());
                        match self.config.collision_policy {
                            CollisionPolicy::Override => {
                                warn!("Plugin '{}' overrides an existing agent", spec.name);
                            }
                            CollisionPolicy::KeepFirst => {
                                warn!("Plugin '{}' ignored, name already registered", spec.name);
                                continue;
                            }
                            CollisionPolicy::Reject => {
                                failures.push(RegistryError::resolution(
                                    &spec.name,
                                    format!(
                                        "plugin {} collides with an existing agent",
                                        spec.source.display()
                                    ),
                                ));
                                continue;
                            }
                        }
                    }

                    info!("Loaded plugin agent: {} ({})", spec.name, handle.kind());
                    snapshot.report.plugin_agents += 1;
                    snapshot.agents.insert(
                        spec.name.clone(),
                        RegisteredAgent {
                            descriptor: spec.descriptor(),
                            handle,
                        },
                    );
                }
            }
            Err(e) => {
                warn!("Plugin discovery failed: {:#}", e);
            }
        }

        for failure in &failures {
            warn!("Failed to load agent: {}", failure);
        }

        snapshot.report.loaded = snapshot.agents.len();
        snapshot.report.failures = failures.iter().map(|e| e.to_string()).collect();
        let report = snapshot.report.clone();

        info!(
            "Registry loaded {} agents ({} failed)",
            report.loaded,
            report.failed()
        );

        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
        report
    }

    fn resolve_manifest_agent(&self, descriptor: &AgentDescriptor) -> Result<AgentHandle, RegistryError> {
        let factory = self.catalog.lookup(&descriptor.class_name).ok_or_else(|| {
            RegistryError::resolution(
                &descriptor.name,
                format!("no implementation registered as '{}'", descriptor.class_name),
            )
        })?;
        debug!(
            "Resolving {} via {} ({})",
            descriptor.name, descriptor.class_name, descriptor.module_path
        );
        let caps = factory(descriptor).map_err(|e| RegistryError::resolution(&descriptor.name, e))?;
        caps.into_handle(&descriptor.name, AgentOrigin::Manifest)
            .map_err(|e| RegistryError::resolution(&descriptor.name, e))
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, name: &str) -> Option<AgentHandle> {
        self.current().agents.get(name).map(|a| a.handle.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.current().agents.contains_key(name)
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        self.current().agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.current().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().agents.is_empty()
    }

    pub fn describe(&self, name: &str) -> Option<AgentDescriptor> {
        self.current().agents.get(name).map(|a| a.descriptor.clone())
    }

    /// Whether dispatch events for this agent should reach the sinks
    pub fn telemetry_enabled(&self, name: &str) -> bool {
        self.current()
            .agents
            .get(name)
            .is_some_and(|a| a.descriptor.telemetry_enabled)
    }

    pub fn agents_info(&self) -> BTreeMap<String, AgentInfo> {
        self.current()
            .agents
            .iter()
            .map(|(name, agent)| {
                let d = &agent.descriptor;
                let info = AgentInfo {
                    name: name.clone(),
                    role: d.role.clone(),
                    kind: agent.handle.kind().to_string(),
                    shape: agent.handle.shape(),
                    origin: agent.handle.origin(),
                    capabilities: d.capabilities.iter().cloned().collect(),
                    confidence_threshold: d.confidence_threshold,
                    memory_enabled: d.memory_enabled,
                    telemetry_enabled: d.telemetry_enabled,
                };
                (name.clone(), info)
            })
            .collect()
    }

    pub fn system_capabilities(&self) -> Map<String, Value> {
        self.current().system_capabilities.clone()
    }

    pub fn last_report(&self) -> LoadReport {
        self.current().report.clone()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("config", &self.config)
            .field("agents", &self.list())
            .finish()
    }
}
