//! browserd entry point: flag parsing, logging, wiring, transport selection.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use browserd::agent::{Agent, BrowserBridge, BrowserProfile, SessionFactory};
use browserd::config::Config;
use browserd::llm::{self, Provider};
use browserd::mcp::ToolDispatcher;
use browserd::server;
use browserd::task::{Janitor, TaskRunner, TaskStore};

/// MCP server for asynchronous browser automation tasks.
#[derive(Parser, Debug)]
#[command(name = "browserd", version, about)]
struct Cli {
    /// Port to listen on for SSE
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Serve MCP over stdio instead of SSE
    #[arg(long)]
    stdio: bool,

    /// Path to a Chrome executable
    #[arg(long)]
    chrome_path: Option<String>,

    /// Browser window width
    #[arg(long)]
    window_width: Option<u32>,

    /// Browser window height
    #[arg(long)]
    window_height: Option<u32>,

    /// Browser locale
    #[arg(long)]
    locale: Option<String>,

    /// Minutes after which finished tasks are evicted
    #[arg(long)]
    task_expiry_minutes: Option<u64>,

    /// Base URL of the automation bridge
    #[arg(long)]
    bridge_url: Option<String>,

    /// LLM provider (openai, anthropic, ollama)
    #[arg(long, default_value = "openai")]
    llm_provider: String,

    /// LLM model name (provider default if not specified)
    #[arg(long)]
    llm_model: Option<String>,

    /// API key for the LLM provider (environment variable if not specified)
    #[arg(long)]
    llm_api_key: Option<String>,

    /// Base URL for the LLM provider (for Ollama)
    #[arg(long)]
    llm_base_url: Option<String>,

    /// Sampling temperature for the LLM
    #[arg(long, default_value_t = 0.0)]
    llm_temperature: f64,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        config.port = self.port;
        if let Some(path) = &self.chrome_path {
            config.chrome_path = Some(path.clone());
        }
        if let Some(width) = self.window_width {
            config.window_width = width;
        }
        if let Some(height) = self.window_height {
            config.window_height = height;
        }
        if let Some(locale) = &self.locale {
            config.locale = locale.clone();
        }
        if let Some(minutes) = self.task_expiry_minutes {
            config.task_retention = Duration::from_secs(minutes * 60);
        }
        if let Some(url) = &self.bridge_url {
            config.bridge_url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs always go to stderr so stdio-mode protocol frames own stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    cli.apply(&mut config);
    config.validate()?;
    let config = Arc::new(config);

    match &config.chrome_path {
        Some(path) => tracing::info!("Using Chrome path: {}", path),
        None => tracing::info!("No Chrome path specified, the bridge uses its default browser"),
    }

    let provider: Provider = cli.llm_provider.parse()?;
    let model = llm::resolve(
        provider,
        cli.llm_model.clone(),
        cli.llm_api_key.clone(),
        cli.llm_base_url.clone(),
        cli.llm_temperature,
    )?;
    tracing::info!(
        "Initialized LLM provider: {} (model {})",
        provider.as_str(),
        model.model
    );

    let bridge = Arc::new(BrowserBridge::new(config.bridge_url.clone(), model));
    tracing::info!("Using automation bridge at {}", bridge.base_url());

    let store = Arc::new(TaskStore::new());
    let runner = Arc::new(TaskRunner::new(
        Arc::clone(&store),
        Arc::clone(&bridge) as Arc<dyn SessionFactory>,
        Arc::clone(&bridge) as Arc<dyn Agent>,
        BrowserProfile::from_config(&config),
        config.max_agent_steps,
    ));
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::clone(&config),
        Arc::clone(&store),
        runner,
    ));

    tokio::spawn(
        Janitor::new(
            Arc::clone(&store),
            config.task_retention,
            config.sweep_interval,
        )
        .run(),
    );

    if config.patient_mode() {
        tracing::info!("Patient mode enabled: browser_use waits for task completion");
    }

    if cli.stdio {
        server::stdio::serve(dispatcher).await
    } else {
        server::sse::serve(config, dispatcher).await
    }
}
