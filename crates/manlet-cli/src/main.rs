use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use manlet_config::{find_config_path, load_config, resolve_path, save_config, BridgeConfig, Config};
use manlet_core::art::OpenAiImageGenerator;
use manlet_core::tools::action_catalog;
use manlet_core::{
    ActionBridge, ActionFacade, ActionOutcome, AutonomousLoop, DirectiveSource, LoopSettings,
    NodeRuntime, RigReasoningEngine,
};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, ollama, openai, openrouter};
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "manlet", about = "Autonomous on-chain agent", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the autonomous loop
    Run {
        /// Stop after this many cycles (runs forever if omitted)
        #[arg(long)]
        cycles: Option<u64>,

        /// Seconds to sleep between cycles
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run a single action through the bridge and print its result
    Invoke {
        /// Exported action name, e.g. getBalance
        action: String,

        /// Action parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
    /// Write a default config file
    Init,
    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let path = cli.config.unwrap_or_else(default_config_path);
            run_init(&path)
        }
        Commands::Status => {
            let path = cli.config.unwrap_or_else(find_config_path);
            run_status(&path)
        }
        Commands::Invoke { action, params } => {
            let config = load_config(&cli.config.unwrap_or_else(find_config_path))?;
            run_invoke(&config, &action, &params).await
        }
        Commands::Run { cycles, interval } => {
            let mut config = load_config(&cli.config.unwrap_or_else(find_config_path))?;
            if let Some(secs) = interval {
                config.autonomy.interval_secs = secs;
            }
            run_autonomous(&config, cycles).await
        }
    }
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".manlet")
        .join("config.json")
}

/// Prefer a configured value, falling back to an environment variable.
fn or_env(value: Option<String>, env_var: &str) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.trim().is_empty()))
}

/// Resolve an API key from config, falling back to an environment variable.
fn resolve_api_key(
    provider_cfg: &Option<manlet_config::ProviderConfig>,
    env_var: &str,
) -> Option<String> {
    or_env(provider_cfg.as_ref().and_then(|c| c.api_key.clone()), env_var)
}

fn api_base(provider_cfg: &Option<manlet_config::ProviderConfig>) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_base.clone())
        .filter(|b| !b.is_empty())
}

fn wallet_address(config: &Config) -> Option<String> {
    or_env(Some(config.wallet.address.clone()), "WALLET_ADDRESS")
}

fn art_api_key(config: &Config) -> Option<String> {
    or_env(config.art.api_key.clone(), "OPENAI_API_KEY")
}

/// Provider key from config or `env_var`; every provider but ollama needs one.
fn require_key(
    provider_cfg: &Option<manlet_config::ProviderConfig>,
    provider: &str,
    env_var: &str,
) -> Result<String> {
    resolve_api_key(provider_cfg, env_var).ok_or_else(|| {
        anyhow::anyhow!("no API key for '{provider}': set providers.{provider}.apiKey or {env_var}")
    })
}

#[allow(deprecated)]
fn create_model_for(
    provider: &str,
    model_name: &str,
    config: &Config,
) -> Result<CompletionModelHandle<'static>> {
    if model_name.is_empty() {
        anyhow::bail!("no model configured for provider '{provider}'");
    }
    let providers = &config.providers;
    let client_err = |e: rig::http_client::Error| anyhow::anyhow!("failed to create {provider} client: {e}");

    let handle = match provider {
        "openai" => {
            let key = require_key(&providers.openai, provider, "OPENAI_API_KEY")?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = api_base(&providers.openai) {
                builder = builder.base_url(base);
            }
            let client: openai::CompletionsClient = builder.build().map_err(client_err)?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        "anthropic" => {
            let key = require_key(&providers.anthropic, provider, "ANTHROPIC_API_KEY")?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(client_err)?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = api_base(&providers.ollama) {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder.build().map_err(client_err)?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        "openrouter" => {
            let key = require_key(&providers.openrouter, provider, "OPENROUTER_API_KEY")?;
            let client: openrouter::Client = openrouter::Client::new(&key).map_err(client_err)?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        other => anyhow::bail!(
            "unknown provider '{other}' (expected openai, anthropic, ollama or openrouter)"
        ),
    };
    tracing::info!("Using {provider} provider with model '{model_name}'");
    Ok(handle)
}

fn scratch_dir(bridge: &BridgeConfig) -> PathBuf {
    bridge
        .scratch_dir
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(resolve_path)
        .unwrap_or_else(|| std::env::temp_dir().join("manlet"))
}

fn build_bridge(bridge: &BridgeConfig) -> Result<ActionBridge> {
    let module = resolve_path(&bridge.actions_module);
    let runtime = NodeRuntime::new(bridge.program.clone(), bridge.program_args.clone(), &module)
        .with_context(|| format!("invalid actions module '{}'", module.display()))?;
    let timeout = (bridge.timeout_secs > 0).then(|| Duration::from_secs(bridge.timeout_secs));
    let bridge = ActionBridge::new(Arc::new(runtime), scratch_dir(bridge))
        .context("cannot start the action bridge")?
        .with_timeout(timeout);
    tracing::info!(
        "Action bridge ready (module: {}, scratch: {})",
        module.display(),
        bridge.scratch_dir().display()
    );
    Ok(bridge)
}

fn parse_params(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("--params is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--params must be a JSON object, got {other}"),
    }
}

async fn run_autonomous(config: &Config, cycles: Option<u64>) -> Result<()> {
    let bridge = Arc::new(build_bridge(&config.bridge)?);
    let artist = Arc::new(OpenAiImageGenerator::new(
        art_api_key(config).unwrap_or_default(),
        &config.art,
    )?);
    let facade = Arc::new(ActionFacade::new(bridge, artist));
    let catalog = Arc::new(action_catalog(facade));

    let wallet = wallet_address(config).unwrap_or_else(|| {
        tracing::warn!("No wallet address configured; the agent will not know its own address");
        String::new()
    });
    let source = DirectiveSource::new(
        &config.agent.name,
        &wallet,
        config.autonomy.directive.clone(),
        catalog,
    );

    let model = create_model_for(&config.agent.provider, &config.agent.model, config)?;
    let engine = RigReasoningEngine::new(
        model,
        &config.agent.model,
        &config.agent.name,
        source.instructions(),
    )
    .with_sampling(config.agent.temperature, config.agent.max_tokens)
    .with_max_tool_iterations(config.agent.max_tool_iterations);

    let stdout = std::io::stdout();
    let styled = stdout.is_terminal();
    let mut autonomous = AutonomousLoop::with_output(
        engine,
        source,
        LoopSettings::from_config(&config.autonomy),
        Box::new(stdout),
        styled,
    );
    autonomous.run_for(cycles).await
}

async fn run_invoke(config: &Config, action: &str, raw_params: &str) -> Result<()> {
    let params = parse_params(raw_params)?;
    let bridge = build_bridge(&config.bridge)?;
    match bridge.execute(action, params).await {
        ActionOutcome::Success(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        ActionOutcome::Failure(message) => anyhow::bail!("{action} failed: {message}"),
    }
}

fn run_init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `manlet init` again.");
        return Ok(());
    }
    save_config(config_path, &Config::default())?;
    println!("Wrote default config to {}", config_path.display());
    println!("Set wallet.address and an OpenAI key (art.apiKey or OPENAI_API_KEY) before `manlet run`.");
    Ok(())
}

fn run_status(config_path: &Path) -> Result<()> {
    println!("manlet status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!(
            "  Config:    {} (not found, using defaults; run `manlet init`)",
            config_path.display()
        );
    }
    let config = load_config(config_path)?;

    println!("  Agent:     {}", config.agent.name);
    println!("  Provider:  {}", config.agent.provider);
    println!("  Model:     {}", config.agent.model);
    println!(
        "  Wallet:    {}",
        wallet_address(&config).unwrap_or_else(|| "(not set)".into())
    );
    println!();

    let bridge = &config.bridge;
    let module = resolve_path(&bridge.actions_module);
    println!("  Bridge:");
    println!(
        "    Interpreter: {} ({})",
        bridge.program,
        match which::which(&bridge.program) {
            Ok(path) => path.display().to_string(),
            Err(_) => "not found".into(),
        }
    );
    println!(
        "    Actions:     {} ({})",
        module.display(),
        if module.exists() { "found" } else { "not found" }
    );
    println!("    Scratch:     {}", scratch_dir(bridge).display());
    println!(
        "    Timeout:     {}",
        if bridge.timeout_secs > 0 {
            format!("{}s", bridge.timeout_secs)
        } else {
            "none".into()
        }
    );
    println!();

    let configured = |key: Option<String>| if key.is_some() { "configured" } else { "not configured" };
    println!("  Keys:");
    println!("    Art (OpenAI): {}", configured(art_api_key(&config)));
    println!(
        "    OpenAI:       {}",
        configured(resolve_api_key(&config.providers.openai, "OPENAI_API_KEY"))
    );
    println!(
        "    Anthropic:    {}",
        configured(resolve_api_key(&config.providers.anthropic, "ANTHROPIC_API_KEY"))
    );
    println!(
        "    OpenRouter:   {}",
        configured(resolve_api_key(&config.providers.openrouter, "OPENROUTER_API_KEY"))
    );
    println!();

    let autonomy = &config.autonomy;
    println!(
        "  Loop:      every {}s, backoff {}s, gives up after {} failures, history window {}",
        autonomy.interval_secs,
        autonomy.backoff_secs,
        autonomy.max_consecutive_failures,
        if autonomy.history_window == 0 {
            "unbounded".to_string()
        } else {
            autonomy.history_window.to_string()
        }
    );
    Ok(())
}
