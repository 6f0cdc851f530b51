//! Plugin discovery
//!
//! A plugin is a `*.toml` file in the plugin directory. Two kinds exist:
//!
//! ```toml
//! name = "word_count"
//! kind = "command"
//! command = "wc"
//! args = ["-w"]
//! timeout_secs = 10
//! ```
//!
//! ```toml
//! name = "echo"
//! kind = "builtin"
//! handler = "EchoAgent"
//! ```
//!
//! Command plugins receive `{"input": ..., "context": {...}}` as JSON on stdin
//! and answer on stdout with either a JSON object or plain text.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::catalog::HandlerCatalog;
use super::handler::{AgentHandler, AgentOutput, HandlerCapabilities};
use super::manifest::{AgentDescriptor, DEFAULT_ROLE};
use crate::error::RegistryError;
use crate::types::AgentContext;

const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Command,
    Builtin,
}

/// A parsed plugin descriptor file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    pub kind: PluginKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_plugin_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_true")]
    pub telemetry_enabled: bool,
    #[serde(skip)]
    pub source: PathBuf,
}

fn default_plugin_timeout() -> u64 {
    DEFAULT_PLUGIN_TIMEOUT_SECS
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_true() -> bool {
    true
}

impl PluginSpec {
    pub fn parse(text: &str, source: &Path) -> Result<Self, RegistryError> {
        let mut spec: PluginSpec = toml::from_str(text).map_err(|e| {
            RegistryError::resolution(source.display().to_string(), format!("invalid plugin: {}", e))
        })?;
        if spec.name.trim().is_empty() {
            return Err(RegistryError::resolution(
                source.display().to_string(),
                "plugin name is empty",
            ));
        }
        spec.source = source.to_path_buf();
        Ok(spec)
    }

    /// Descriptor for listings; the module path points at the plugin file
    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            role: self.role.clone(),
            module_path: self.source.display().to_string(),
            capabilities: self.capabilities.iter().cloned().collect(),
            telemetry_enabled: self.telemetry_enabled,
            ..AgentDescriptor::new(&self.name)
        }
    }

    /// Turn the descriptor into a capability set
    pub fn build(&self, catalog: &HandlerCatalog) -> Result<HandlerCapabilities, RegistryError> {
        match self.kind {
            PluginKind::Command => {
                let program = self
                    .command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        RegistryError::resolution(&self.name, "command plugin has no 'command'")
                    })?;
                let agent = CommandAgent::new(
                    program,
                    self.args.clone(),
                    Duration::from_secs(self.timeout_secs.max(1)),
                );
                Ok(HandlerCapabilities::new(format!("command:{}", program)).with_async(Arc::new(agent)))
            }
            PluginKind::Builtin => {
                let class = self.handler.as_deref().ok_or_else(|| {
                    RegistryError::resolution(&self.name, "builtin plugin has no 'handler'")
                })?;
                let factory = catalog.lookup(class).ok_or_else(|| {
                    RegistryError::resolution(&self.name, format!("no handler registered as '{}'", class))
                })?;
                factory(&self.descriptor()).map_err(|e| RegistryError::resolution(&self.name, e))
            }
        }
    }
}

/// Result of scanning the plugin directory
#[derive(Debug, Default)]
pub struct PluginScan {
    pub specs: Vec<PluginSpec>,
    pub failures: Vec<RegistryError>,
}

/// Scan `dir` for `*.toml` plugin descriptors, creating it when absent.
/// Files are visited in path order so the result is stable across reloads.
pub fn discover_plugins(dir: &Path) -> Result<PluginScan> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create plugin directory {}", dir.display()))?;
        info!("Created plugin directory {}", dir.display());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read plugin directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut scan = PluginScan::default();
    for path in paths {
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| RegistryError::resolution(path.display().to_string(), e))
            .and_then(|text| PluginSpec::parse(&text, &path));
        match parsed {
            Ok(spec) => {
                debug!("Discovered plugin '{}' in {}", spec.name, path.display());
                scan.specs.push(spec);
            }
            Err(e) => {
                warn!("Skipping plugin {}: {}", path.display(), e);
                scan.failures.push(e);
            }
        }
    }

    Ok(scan)
}

/// Agent backed by an external process
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAgent {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl AgentHandler for CommandAgent {
    async fn invoke(&self, input: &str, context: &AgentContext) -> Result<AgentOutput> {
        let payload = serde_json::to_vec(&json!({ "input": input, "context": context }))?;

        debug!("Running plugin command: {} {:?}", self.program, self.args);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.program))?;

        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&payload).await {
                // The process may exit without reading its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };

        let (fed, output) = tokio::time::timeout(self.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| {
            anyhow!(
                "'{}' timed out after {} seconds",
                self.program,
                self.timeout.as_secs()
            )
        })?;
        fed.context("Failed to write plugin input")?;
        let output = output.context("Failed to collect plugin output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "'{}' exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        match serde_json::from_str::<Value>(&stdout) {
            Ok(value @ Value::Object(_)) => Ok(AgentOutput::Structured(value)),
            _ => Ok(AgentOutput::Text(stdout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::handler::{AgentOrigin, HandlerShape};

    fn write(dir: &Path, file: &str, body: &str) {
        std::fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn test_discover_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("plugins");
        let scan = discover_plugins(&dir).unwrap();
        assert!(dir.is_dir());
        assert!(scan.specs.is_empty());
        assert!(scan.failures.is_empty());
    }

    #[test]
    fn test_discover_sorted_and_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "b.toml", "name = \"beta\"\nkind = \"builtin\"\nhandler = \"EchoAgent\"\n");
        write(tmp.path(), "a.toml", "name = \"alpha\"\nkind = \"command\"\ncommand = \"cat\"\n");
        write(tmp.path(), "broken.toml", "name = \"x\"\nkind = \"teleport\"\n");
        write(tmp.path(), "notes.txt", "ignored");

        let scan = discover_plugins(tmp.path()).unwrap();
        let names: Vec<_> = scan.specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(scan.failures.len(), 1);
        assert_eq!(scan.specs[0].timeout_secs, 30);
        assert_eq!(scan.specs[0].role, "Unknown");
        assert!(scan.specs[1].source.ends_with("b.toml"));
    }

    #[test]
    fn test_build_requires_command_or_handler() {
        let catalog = HandlerCatalog::new();
        let spec = PluginSpec::parse("name = \"c\"\nkind = \"command\"\n", Path::new("c.toml")).unwrap();
        assert!(spec.build(&catalog).is_err());

        let spec = PluginSpec::parse(
            "name = \"b\"\nkind = \"builtin\"\nhandler = \"MissingAgent\"\n",
            Path::new("b.toml"),
        )
        .unwrap();
        let err = spec.build(&catalog).unwrap_err();
        assert!(err.to_string().contains("MissingAgent"));
    }

    #[tokio::test]
    async fn test_command_agent_structured_output() {
        let spec = PluginSpec::parse(
            r#"
name = "shout"
kind = "command"
command = "sh"
args = ["-c", "cat > /dev/null; echo '{\"output\": \"loud\", \"score\": 3}'"]
"#,
            Path::new("shout.toml"),
        )
        .unwrap();
        let caps = spec.build(&HandlerCatalog::new()).unwrap();
        assert_eq!(caps.shape(), Some(HandlerShape::Async));
        let handle = caps.into_handle("shout", AgentOrigin::Plugin).unwrap();
        let out = handle.call("hello", &AgentContext::new()).await.unwrap();
        assert_eq!(out, AgentOutput::Structured(json!({"output": "loud", "score": 3})));
    }

    #[tokio::test]
    async fn test_command_agent_reads_stdin() {
        let agent = CommandAgent::new("cat", vec![], Duration::from_secs(5));
        let mut context = AgentContext::new();
        context.insert("k".to_string(), json!("v"));
        let out = agent.invoke("ping", &context).await.unwrap();
        assert_eq!(
            out,
            AgentOutput::Structured(json!({"input": "ping", "context": {"k": "v"}}))
        );
    }

    #[tokio::test]
    async fn test_command_agent_plain_text_and_failure() {
        let agent = CommandAgent::new(
            "sh",
            vec!["-c".to_string(), "cat > /dev/null; echo plain words".to_string()],
            Duration::from_secs(5),
        );
        let out = agent.invoke("x", &AgentContext::new()).await.unwrap();
        assert_eq!(out, AgentOutput::Text("plain words".to_string()));

        let agent = CommandAgent::new(
            "sh",
            vec!["-c".to_string(), "cat > /dev/null; echo nope >&2; exit 3".to_string()],
            Duration::from_secs(5),
        );
        let err = agent.invoke("x", &AgentContext::new()).await.unwrap_err();
        assert!(err.to_string().contains("exited with code 3"));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_command_agent_timeout() {
        let agent = CommandAgent::new(
            "sh",
            vec!["-c".to_string(), "cat > /dev/null; sleep 5".to_string()],
            Duration::from_secs(1),
        );
        let err = agent.invoke("x", &AgentContext::new()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_command_agent_timeout_covers_unread_input() {
        let agent = CommandAgent::new(
            "sh",
            vec!["-c".to_string(), "sleep 5".to_string()],
            Duration::from_secs(1),
        );
        let big = "x".repeat(1024 * 1024);
        let started = std::time::Instant::now();
        let err = agent.invoke(&big, &AgentContext::new()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_command_agent_ignoring_input_succeeds() {
        let agent = CommandAgent::new("echo", vec!["hi".to_string()], Duration::from_secs(5));
        let big = "x".repeat(1024 * 1024);
        let out = agent.invoke(&big, &AgentContext::new()).await.unwrap();
        assert_eq!(out, AgentOutput::Text("hi".to_string()));
    }
}
