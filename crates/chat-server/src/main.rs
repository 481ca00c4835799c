use std::io;
use std::path::PathBuf;

use chat_engine::EngineConfig;
use chat_server::logging::init_logging;
use chat_server::{run_server, ServerConfig};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "chat-server")]
#[command(about = "Branching conversation server")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8081")]
    port: u16,

    /// Engine config file (TOML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for conversation files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// LLM API base URL
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    llm_base_url: String,

    /// LLM model name
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// LLM API key
    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    api_key: String,

    /// Log level (overrides debug flag)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

fn engine_config(cli: &Cli) -> io::Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).map_err(io::Error::other)?,
        None => EngineConfig::default(),
    };
    let config = config.with_env_overrides();
    Ok(match &cli.data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    })
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();

    if cli.log_level.is_some() {
        env_logger::init();
    } else {
        init_logging(cli.debug);
    }

    let engine = engine_config(&cli)?;

    log::info!("Starting chat server on port {}", cli.port);
    log::info!("  Base URL: {}", cli.llm_base_url);
    log::info!("  Model: {}", cli.model);
    log::info!("  Data dir: {}", engine.data_dir.display());
    if cli.debug {
        log::debug!("Engine configuration: {:?}", engine);
    }

    run_server(ServerConfig {
        port: cli.port,
        llm_base_url: cli.llm_base_url,
        model: cli.model,
        api_key: cli.api_key,
        engine,
    })
    .await
}
