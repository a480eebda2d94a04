use anthropic_openai_bridge::config::config_search_paths;
use anthropic_openai_bridge::{build_router, AnthropicClient, AppState, BridgeConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "anthropic-openai-bridge",
    about = "Serve the Anthropic Messages API on top of any OpenAI-compatible chat service",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Provider preset name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Upstream base URL, e.g. http://localhost:11434/v1 (overrides config and preset)
    #[arg(long)]
    base_url: Option<String>,

    /// Request log file (JSONL)
    #[arg(long, default_value = "anthropic-openai-bridge.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anthropic_openai_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(provider) = cli.provider {
        config.provider.name = provider;
        config.provider.base_url = None;
        config.provider.api_key_env = None;
    }
    if let Some(base_url) = cli.base_url {
        config.provider.base_url = Some(base_url);
    }

    let logger = SharedLogger::new(&cli.log_file)?;
    let client = AnthropicClient::from_config(&config, Some(logger.clone()))?;

    info!("anthropic-openai-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:  {}", config.provider.name);
    info!("  Base URL:  {}", client.base_url());
    info!("  API key:   ${}", config.api_key_env());
    info!("  Port:      {}", config.port);
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting provider={} base_url={} port={}",
            config.provider.name,
            client.base_url(),
            config.port
        ),
    );

    let state = Arc::new(AppState { client, logger });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
