use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchyard_core::agents::builtin::register_builtins;
use switchyard_core::{
    AgentContext, AgentRegistry, EventBus, EventSink, HandlerCatalog, PromptRouter, RecentEvents,
    RegistryConfig, Switchboard, TracingSink,
};
use switchyard_gateway::GatewayServer;
use switchyard_rewrite::RewriteServer;

mod config;

use config::SwitchyardConfig;

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version)]
#[command(about = "Switchyard: route prompts to agents, run them, combine their answers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory, default config, manifest and plugins
    Init,

    /// Show current configuration
    Config,

    /// List registered agents
    Agents,

    /// Run one agent by name
    Run {
        agent: String,
        input: String,
        /// JSON object passed to the agent as context
        #[arg(long)]
        context: Option<String>,
    },

    /// Route a prompt and run the selected agent
    Ask {
        input: String,
        /// Skip routing and use this agent
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// Show the routing decision for a prompt without running anything
    Route { input: String },

    /// Run several agents on the same input and rank the answers
    Parallel {
        /// Comma-separated agent names
        #[arg(short, long, value_delimiter = ',', required = true)]
        agents: Vec<String>,
        input: String,
    },

    /// Start the HTTP gateway
    Serve,

    /// Start the prompt rewrite/route service
    RewriteService,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Agents => cmd_agents(&cli.config),
        Commands::Run {
            agent,
            input,
            context,
        } => cmd_run(&cli.config, &agent, &input, context.as_deref()).await,
        Commands::Ask { input, agent } => cmd_ask(&cli.config, &input, agent.as_deref()).await,
        Commands::Route { input } => cmd_route(&cli.config, &input).await,
        Commands::Parallel { agents, input } => cmd_parallel(&cli.config, &agents, &input).await,
        Commands::Serve => cmd_serve(&cli.config).await,
        Commands::RewriteService => cmd_rewrite_service(&cli.config).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    let plugins_dir = config_dir.join("plugins");
    tokio::fs::create_dir_all(&plugins_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", plugins_dir.display()))?;

    let files = [
        (
            config_dir.join(config::CONFIG_FILE),
            include_str!("../../../config/default.toml"),
        ),
        (
            config_dir.join("agent_manifest.json"),
            include_str!("../../../config/agent_manifest.json"),
        ),
        (
            plugins_dir.join("scorer.toml"),
            include_str!("../../../config/plugins/scorer.toml"),
        ),
    ];
    for (path, contents) in files {
        if path.exists() {
            warn!("{} already exists, leaving it alone", path.display());
            continue;
        }
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Created {}", path.display());
    }

    println!("Switchyard initialized at {}", config_dir.display());
    println!(
        "Edit {} to point at your manifest and rewrite service.",
        config_dir.join(config::CONFIG_FILE).display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let config = SwitchyardConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_agents(config_path: &Option<PathBuf>) -> Result<()> {
    let config = SwitchyardConfig::load(config_path)?;
    let registry = build_registry(&config)?;
    let agents = registry.agents_info();
    if agents.is_empty() {
        println!("No agents registered.");
        return Ok(());
    }
    for info in agents.values() {
        println!(
            "{:<24} {:<28} {:<20} {}",
            info.name,
            info.role,
            info.kind,
            info.capabilities.join(", ")
        );
    }
    let report = registry.last_report();
    if report.failed() > 0 {
        println!("\n{} agent(s) failed to load:", report.failed());
        for failure in &report.failures {
            println!("  {}", failure);
        }
    }
    Ok(())
}

async fn cmd_run(
    config_path: &Option<PathBuf>,
    agent: &str,
    input: &str,
    context: Option<&str>,
) -> Result<()> {
    let context = match context {
        Some(raw) => parse_context(raw)?,
        None => AgentContext::new(),
    };
    let runtime = Runtime::build(config_path)?;
    let result = runtime.switchboard.invoke(agent, input, &context).await?;
    println!("{}", result.output_text);
    Ok(())
}

async fn cmd_ask(config_path: &Option<PathBuf>, input: &str, agent: Option<&str>) -> Result<()> {
    let runtime = Runtime::build(config_path)?;
    match agent {
        Some(name) => {
            let outcome = runtime.switchboard.handle_prompt(input, Some(name)).await?;
            println!("{}", outcome.output);
        }
        None => {
            let routed = runtime.switchboard.route_and_dispatch(input).await?;
            info!(
                "{} ({:?}, {:.2}) -> {}",
                routed.decision.pattern_type,
                routed.decision.source,
                routed.decision.confidence,
                routed.agent
            );
            println!("{}", routed.output);
        }
    }
    Ok(())
}

async fn cmd_route(config_path: &Option<PathBuf>, input: &str) -> Result<()> {
    let config = SwitchyardConfig::load(config_path)?;
    let router = PromptRouter::new(&config.router_config());
    let decision = router.route(input).await;
    let selection = router.select(&decision);
    let body = serde_json::json!({
        "decision": decision,
        "selection": selection,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cmd_parallel(config_path: &Option<PathBuf>, agents: &[String], input: &str) -> Result<()> {
    let runtime = Runtime::build(config_path)?;
    let result = runtime.switchboard.run_parallel(input, agents).await?;

    for outcome in &result.all_results {
        let marker = if outcome.result.is_error() { " (failed)" } else { "" };
        let score = result
            .evaluations
            .get(&outcome.agent)
            .map(|s| format!(" score {:.2}", s))
            .unwrap_or_default();
        println!("== {}{}{}", outcome.agent, marker, score);
        println!("{}\n", outcome.result.output_text);
    }
    println!(
        "Top: {} ({} agents in {:.2}s)",
        result.top_agent,
        result.agent_count(),
        result.execution_time_seconds
    );
    Ok(())
}

async fn cmd_serve(config_path: &Option<PathBuf>) -> Result<()> {
    let config = SwitchyardConfig::load(config_path)?;
    let bind = socket_addr(&config.gateway.bind, config.gateway.port)?;
    let runtime = Runtime::from_config(&config)?;

    let server = GatewayServer::new(
        bind,
        runtime.switchboard.clone(),
        runtime.recent.clone(),
        runtime.events.clone(),
    )
    .with_request_timeout(Duration::from_secs(config.gateway.request_timeout_secs.max(1)));

    run_until_ctrl_c(|cancel| server.spawn(cancel)).await
}

async fn cmd_rewrite_service(config_path: &Option<PathBuf>) -> Result<()> {
    let config = SwitchyardConfig::load(config_path)?;
    let bind = socket_addr(&config.rewrite_service.bind, config.rewrite_service.port)?;
    let server = RewriteServer::new(bind, config.patterns_file());
    run_until_ctrl_c(|cancel| server.spawn(cancel)).await
}

/// Start a server task and cancel it on Ctrl-C
async fn run_until_ctrl_c<F>(start: F) -> Result<()>
where
    F: FnOnce(CancellationToken) -> tokio::task::JoinHandle<Result<()>>,
{
    let cancel = CancellationToken::new();
    let mut handle = start(cancel.clone());

    tokio::select! {
        joined = &mut handle => {
            return joined.context("Server task panicked")?;
        }
        res = signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down...");
        }
    }

    cancel.cancel();
    handle.await.context("Server task panicked")??;
    info!("Shutdown complete");
    Ok(())
}

fn socket_addr(bind: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))
}

fn parse_context(raw: &str) -> Result<AgentContext> {
    match serde_json::from_str(raw).context("--context is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("--context must be a JSON object"),
    }
}

fn build_catalog(config: &SwitchyardConfig) -> Result<HandlerCatalog> {
    let mut catalog = HandlerCatalog::new();
    register_builtins(&mut catalog);

    if let Some(class) = &config.registry.fallback_handler {
        let Some(factory) = catalog.lookup(class) else {
            bail!(
                "registry.fallback_handler '{}' is not a known handler (known: {})",
                class,
                catalog.class_names().join(", ")
            );
        };
        catalog.set_fallback(move |descriptor| factory(descriptor));
    }
    Ok(catalog)
}

fn build_registry(config: &SwitchyardConfig) -> Result<Arc<AgentRegistry>> {
    let catalog = build_catalog(config)?;
    let registry_config = RegistryConfig::new(config.manifest_path(), config.plugins_dir())
        .with_collision_policy(config.registry.collision_policy);
    Ok(Arc::new(AgentRegistry::load(registry_config, catalog)))
}

/// Everything a command needs to dispatch, wired once per process
struct Runtime {
    switchboard: Arc<Switchboard>,
    recent: Arc<RecentEvents>,
    events: EventBus,
}

impl Runtime {
    fn build(config_path: &Option<PathBuf>) -> Result<Self> {
        let config = SwitchyardConfig::load(config_path)?;
        Self::from_config(&config)
    }

    fn from_config(config: &SwitchyardConfig) -> Result<Self> {
        let registry = build_registry(config)?;
        let report = registry.last_report();
        info!(
            "Loaded {} agents ({} from manifest, {} from plugins, {} failed)",
            report.loaded,
            report.manifest_agents,
            report.plugin_agents,
            report.failed()
        );

        let router_config = config.router_config();
        let router = PromptRouter::new(&router_config);
        if router.is_delegating() {
            info!(
                "Routing through rewrite service at {}",
                router_config.service_url.as_deref().unwrap_or_default()
            );
        } else {
            info!("No rewrite service configured, routing with local heuristics");
        }

        let recent = Arc::new(RecentEvents::new(config.gateway.recent_events.max(1)));
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let sinks: Vec<Arc<dyn EventSink>> = vec![
            Arc::new(TracingSink),
            recent.clone() as Arc<dyn EventSink>,
            Arc::new(events.clone()),
        ];

        let switchboard = Arc::new(Switchboard::new(
            registry,
            router,
            config.fanout.clone(),
            sinks,
        ));
        Ok(Self {
            switchboard,
            recent,
            events,
        })
    }
}
