use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use switchyard_core::{CollisionPolicy, FanOutConfig, RouterConfig};
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "switchyard.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchyardConfig {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub fanout: FanOutConfig,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub rewrite_service: RewriteServiceSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: String,
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    /// Catalog class used for manifest agents with no registered implementation
    #[serde(default)]
    pub fallback_handler: Option<String>,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            plugins_dir: default_plugins_dir(),
            collision_policy: CollisionPolicy::default(),
            fallback_handler: None,
        }
    }
}

fn default_manifest() -> String {
    config_dir().join("agent_manifest.json").display().to_string()
}

fn default_plugins_dir() -> String {
    config_dir().join("plugins").display().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_recent_events")]
    pub recent_events: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_gateway_port(),
            request_timeout_secs: default_request_timeout(),
            recent_events: default_recent_events(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    60
}

fn default_recent_events() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteServiceSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_rewrite_port")]
    pub port: u16,
    #[serde(default)]
    pub patterns_file: Option<String>,
}

impl Default for RewriteServiceSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_rewrite_port(),
            patterns_file: None,
        }
    }
}

fn default_rewrite_port() -> u16 {
    8001
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("switchyard")
}

impl SwitchyardConfig {
    /// Load from `custom_path`, or from the config directory. A missing default
    /// file yields the built-in defaults; a missing explicit file is an error.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = match custom_path {
            Some(p) => p.clone(),
            None => {
                let default = config_dir().join(CONFIG_FILE);
                if !default.exists() {
                    info!(
                        "No config at {}, using defaults. Run `switchyard init` to create one.",
                        default.display()
                    );
                    return Ok(Self::default());
                }
                default
            }
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content, |name| std::env::var(name).ok());
        let config: Self = toml::from_str(&expanded)?;

        if let Some(url) = &config.router.service_url {
            if url.trim().is_empty() {
                warn!("router.service_url is empty; the rewrite service will not be used");
            }
        }
        Ok(config)
    }

    pub fn manifest_path(&self) -> PathBuf {
        expand_path(&self.registry.manifest)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        expand_path(&self.registry.plugins_dir)
    }

    pub fn patterns_file(&self) -> Option<PathBuf> {
        self.rewrite_service.patterns_file.as_deref().map(expand_path)
    }

    /// Router settings with an empty service URL treated as absent
    pub fn router_config(&self) -> RouterConfig {
        let mut router = self.router.clone();
        router.service_url = router
            .service_url
            .filter(|u| !u.trim().is_empty())
            .map(|u| expand_tilde(&u));
        router
    }
}

/// Only these variables, plus any `SWITCHYARD_*`, may be expanded from config files
const ALLOWED_ENV_VARS: &[&str] = &["HOME", "USER", "XDG_CONFIG_HOME"];

fn env_var_allowed(name: &str) -> bool {
    ALLOWED_ENV_VARS.contains(&name) || name.starts_with("SWITCHYARD_")
}

/// Expand `${VAR}` for allowed variables; others are left as written
fn expand_env_vars<F>(s: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !env_var_allowed(&var_name) {
            warn!(
                "Skipping expansion of env var '{}' in config (not allowed)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

fn expand_tilde(s: &str) -> String {
    match (s.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).display().to_string(),
        _ => s.to_string(),
    }
}

pub fn expand_path(s: &str) -> PathBuf {
    PathBuf::from(expand_tilde(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_valid() {
        let cfg = SwitchyardConfig::parse("").unwrap();
        assert_eq!(cfg.gateway.port, 8000);
        assert_eq!(cfg.rewrite_service.port, 8001);
        assert_eq!(cfg.gateway.request_timeout_secs, 60);
        assert_eq!(cfg.router.confidence_threshold, 0.7);
        assert!(cfg.router.enabled);
        assert!(cfg.fanout.max_concurrent.is_none());
        assert_eq!(cfg.registry.collision_policy, CollisionPolicy::Override);
        assert!(cfg.manifest_path().ends_with("agent_manifest.json"));
    }

    #[test]
    fn test_sections_parse() {
        let cfg = SwitchyardConfig::parse(
            r#"
[registry]
manifest = "/srv/agents.json"
plugins_dir = "/srv/plugins"
collision_policy = "keep-first"
fallback_handler = "PersonaAgent"

[router]
service_url = "http://127.0.0.1:8001"
confidence_threshold = 0.8
route_timeout_secs = 3

[fanout]
evaluator = "scorer"
max_concurrent = 2

[gateway]
port = 9000
"#,
        )
        .unwrap();
        assert_eq!(cfg.manifest_path(), PathBuf::from("/srv/agents.json"));
        assert_eq!(cfg.registry.collision_policy, CollisionPolicy::KeepFirst);
        assert_eq!(cfg.registry.fallback_handler.as_deref(), Some("PersonaAgent"));
        assert_eq!(cfg.router_config().service_url.as_deref(), Some("http://127.0.0.1:8001"));
        assert_eq!(cfg.router.route_timeout_secs, 3);
        assert_eq!(cfg.router.rewrite_timeout_secs, 30);
        assert_eq!(cfg.fanout.evaluator.as_deref(), Some("scorer"));
        assert_eq!(cfg.fanout.max_concurrent, Some(2));
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
    }

    #[test]
    fn test_empty_service_url_is_absent() {
        let cfg = SwitchyardConfig::parse("[router]\nservice_url = \"\"\n").unwrap();
        assert!(cfg.router_config().service_url.is_none());
    }

    #[test]
    fn test_expand_env_vars_allowlist() {
        let lookup = |name: &str| match name {
            "SWITCHYARD_HOST" => Some("10.0.0.5".to_string()),
            "SECRET" => Some("leaked".to_string()),
            _ => None,
        };
        assert_eq!(
            expand_env_vars("http://${SWITCHYARD_HOST}:8001", lookup),
            "http://10.0.0.5:8001"
        );
        assert_eq!(expand_env_vars("${SECRET}", lookup), "${SECRET}");
        assert_eq!(expand_env_vars("${SWITCHYARD_UNSET}x", lookup), "x");
        assert_eq!(expand_env_vars("no vars ${", lookup), "no vars ${");
    }

    #[test]
    fn test_default_config_file_parses() {
        let cfg = SwitchyardConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(cfg.fanout.evaluator.as_deref(), Some("scorer"));
        assert_eq!(cfg.registry.fallback_handler.as_deref(), Some("PersonaAgent"));
        assert!(cfg.fanout.max_concurrent.is_none());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = Some(tmp.path().join("nope.toml"));
        assert!(SwitchyardConfig::load(&missing).is_err());

        let path = tmp.path().join("switchyard.toml");
        std::fs::write(&path, "[gateway]\nport = 8100\n").unwrap();
        assert_eq!(SwitchyardConfig::load(&Some(path)).unwrap().gateway.port, 8100);
    }
}
