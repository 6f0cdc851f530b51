//! Agent manifest parsing
//!
//! The manifest is a JSON document of the form
//! `{"agents": {name: {role, capabilities, ...}}, "system_capabilities": {...}}`.
//! Each entry becomes an [`AgentDescriptor`]; entries that fail to parse are
//! reported individually and never take the rest of the manifest down.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RegistryError;

pub const DEFAULT_ROLE: &str = "Unknown";
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Immutable description of one agent, as declared in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub role: String,
    pub module_path: String,
    pub class_name: String,
    pub capabilities: BTreeSet<String>,
    pub confidence_threshold: f64,
    pub memory_enabled: bool,
    pub telemetry_enabled: bool,
}

impl AgentDescriptor {
    /// Descriptor with every optional field at its default
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            module_path: module_path_for(&name),
            class_name: class_name_for(&name),
            name,
            role: DEFAULT_ROLE.to_string(),
            capabilities: BTreeSet::new(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            memory_enabled: true,
            telemetry_enabled: true,
        }
    }

    fn from_entry(name: &str, entry: ManifestEntry) -> Result<Self, RegistryError> {
        if !(0.0..=1.0).contains(&entry.confidence_threshold) {
            return Err(RegistryError::resolution(
                name,
                format!(
                    "confidence_threshold {} is outside [0, 1]",
                    entry.confidence_threshold
                ),
            ));
        }
        Ok(Self {
            role: entry.role,
            capabilities: entry.capabilities.into_iter().collect(),
            confidence_threshold: entry.confidence_threshold,
            memory_enabled: entry.memory_enabled,
            telemetry_enabled: entry.telemetry_enabled,
            ..Self::new(name)
        })
    }
}

/// One raw `agents.<name>` object in the manifest
#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    #[serde(default = "default_role")]
    role: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default = "default_confidence_threshold")]
    confidence_threshold: f64,
    #[serde(default = "default_true")]
    memory_enabled: bool,
    #[serde(default = "default_true")]
    telemetry_enabled: bool,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_true() -> bool {
    true
}

/// A parsed manifest: valid descriptors in name order, per-entry failures,
/// and the free-form system capability block
#[derive(Debug, Default)]
pub struct Manifest {
    pub descriptors: Vec<AgentDescriptor>,
    pub failures: Vec<RegistryError>,
    pub system_capabilities: Map<String, Value>,
}

/// Parse manifest text. Only a document-level problem is an error; malformed
/// entries land in [`Manifest::failures`].
pub fn parse_manifest(text: &str, origin: &Path) -> Result<Manifest, RegistryError> {
    let doc: Value = serde_json::from_str(text).map_err(|e| RegistryError::ManifestInvalid {
        path: origin.to_path_buf(),
        reason: e.to_string(),
    })?;

    let Value::Object(mut root) = doc else {
        return Err(RegistryError::ManifestInvalid {
            path: origin.to_path_buf(),
            reason: "top level is not an object".to_string(),
        });
    };

    let agents = match root.remove("agents") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(RegistryError::ManifestInvalid {
                path: origin.to_path_buf(),
                reason: "'agents' is not an object".to_string(),
            });
        }
    };

    let system_capabilities = match root.remove("system_capabilities") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let mut manifest = Manifest {
        system_capabilities,
        ..Default::default()
    };

    for (name, raw) in agents {
        let parsed = serde_json::from_value::<ManifestEntry>(raw)
            .map_err(|e| RegistryError::resolution(&name, format!("malformed entry: {}", e)))
            .and_then(|entry| AgentDescriptor::from_entry(&name, entry));
        match parsed {
            Ok(descriptor) => {
                debug!("Manifest entry parsed: {}", name);
                manifest.descriptors.push(descriptor);
            }
            Err(e) => manifest.failures.push(e),
        }
    }

    Ok(manifest)
}

/// Read and parse the manifest file
pub fn load_manifest(path: &Path) -> Result<Manifest, RegistryError> {
    if !path.exists() {
        return Err(RegistryError::ManifestMissing(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| RegistryError::ManifestInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_manifest(&text, path)
}

/// `vp_design` -> `VpDesignAgent`
pub fn class_name_for(name: &str) -> String {
    let mut class: String = name
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    class.push_str("Agent");
    class
}

/// `vp_design` -> `agents.vp_design_agent`
pub fn module_path_for(name: &str) -> String {
    format!("agents.{}_agent", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn origin() -> PathBuf {
        PathBuf::from("agent_manifest.json")
    }

    #[test]
    fn test_naming_convention() {
        assert_eq!(class_name_for("vp_design"), "VpDesignAgent");
        assert_eq!(class_name_for("evaluator"), "EvaluatorAgent");
        assert_eq!(class_name_for("vp_of_product"), "VpOfProductAgent");
        assert_eq!(module_path_for("deck_narrator"), "agents.deck_narrator_agent");
    }

    #[test]
    fn test_parse_defaults() {
        let text = r#"{"agents": {"evaluator": {}}}"#;
        let manifest = parse_manifest(text, &origin()).unwrap();
        assert_eq!(manifest.descriptors.len(), 1);
        let d = &manifest.descriptors[0];
        assert_eq!(d.role, "Unknown");
        assert!(d.capabilities.is_empty());
        assert_eq!(d.confidence_threshold, 0.8);
        assert!(d.memory_enabled);
        assert!(d.telemetry_enabled);
        assert_eq!(d.class_name, "EvaluatorAgent");
    }

    #[test]
    fn test_malformed_entries_are_isolated() {
        let text = r#"{
            "agents": {
                "vp_design": {"role": "VP of Design", "capabilities": ["design", "critique"]},
                "broken": {"capabilities": "not-a-list"},
                "out_of_range": {"confidence_threshold": 1.5},
                "evaluator": {"telemetry_enabled": false}
            },
            "system_capabilities": {"parallel": true}
        }"#;
        let manifest = parse_manifest(text, &origin()).unwrap();
        let names: Vec<_> = manifest.descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["evaluator", "vp_design"]);
        assert_eq!(manifest.failures.len(), 2);
        assert!(manifest
            .failures
            .iter()
            .all(|f| matches!(f, RegistryError::AgentResolutionFailed { .. })));
        assert_eq!(manifest.system_capabilities["parallel"], Value::Bool(true));

        let vp = manifest.descriptors.iter().find(|d| d.name == "vp_design").unwrap();
        assert!(vp.capabilities.contains("critique"));
    }

    #[test]
    fn test_invalid_document() {
        let err = parse_manifest("{not json", &origin()).unwrap_err();
        assert!(matches!(err, RegistryError::ManifestInvalid { .. }));

        let err = parse_manifest(r#"{"agents": []}"#, &origin()).unwrap_err();
        assert!(matches!(err, RegistryError::ManifestInvalid { .. }));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_manifest(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, RegistryError::ManifestMissing(_)));
    }
}
