use anyhow::{anyhow, Context};
use augur_config::{expand_tilde, ConfigManager};
use augur_observability::LogManager;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "augur-server")]
#[command(about = "Augur real-time market chat gateway")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "AUGUR_CONFIG", default_value = "~/.augur/config.json")]
    config: String,

    /// Bind address (overrides gateway.bind)
    #[arg(long, env = "AUGUR_BIND")]
    bind: Option<String>,

    /// Shared secret clients must present (overrides gateway.auth_token)
    #[arg(long, env = "AUGUR_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Completion API base URL (overrides engine.base_url)
    #[arg(long, env = "LLM_BASE_URL")]
    llm_base_url: Option<String>,

    /// Model name (overrides engine.model)
    #[arg(long, env = "LLM_MODEL")]
    model: Option<String>,

    /// Market API base URL (overrides markets.base_url)
    #[arg(long, env = "AUGUR_MARKETS_URL")]
    markets_url: Option<String>,

    /// Log level (overrides logging.level)
    #[arg(long, env = "AUGUR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path =
        expand_tilde(&cli.config).ok_or_else(|| anyhow!("Could not resolve {}", cli.config))?;
    let manager = ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let mut config = manager.snapshot().await;

    // CLI flags take precedence over the file
    if let Some(bind) = cli.bind {
        config.gateway.bind = bind;
    }
    if let Some(token) = cli.auth_token {
        config.gateway.auth_token = Some(token);
    }
    if let Some(url) = cli.llm_base_url {
        config.engine.base_url = url;
    }
    if let Some(model) = cli.model {
        config.engine.model = model;
    }
    if let Some(url) = cli.markets_url {
        config.markets.base_url = url;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json_format = true;
    }
    ConfigManager::validate(&config)?;

    let _log_manager = LogManager::init(config.logging.clone())?;

    info!("Config loaded from {}", config_path.display());
    info!("  Engine: {} ({})", config.engine.base_url, config.engine.model);
    info!("  Markets: {}", config.markets.base_url);

    let gateway = augur_server::build_gateway(&config)?;
    gateway.run().await?;
    Ok(())
}
