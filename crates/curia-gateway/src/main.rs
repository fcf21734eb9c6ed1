//! Gateway binary: load configuration, wire the subsystems, serve.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use curia_agent::{ChatClientConfig, OpenAiChatClient};
use curia_auth::{DeploymentMode, mint_service_token};
use curia_capability::HttpTransportFactory;
use curia_gateway::{AppState, Config, GatewayServer};
use curia_store::Database;

#[derive(Debug, Parser)]
#[command(name = "curia-gateway", about = "Curia enterprise assistant gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "curia.toml")]
    config: PathBuf,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_toml_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let bind_addr = args.bind.unwrap_or_else(|| config.bind_addr.clone());

    // Conversation store.
    if let Some(parent) = std::path::Path::new(&config.database_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = Database::open_and_migrate(config.database_path.clone())
        .await
        .context("opening conversation store")?;

    // LLM backend.
    let api_key = std::env::var(&config.llm.api_key_env)
        .with_context(|| format!("reading {}", config.llm.api_key_env))?;
    let chat = Arc::new(OpenAiChatClient::new(ChatClientConfig {
        api_key,
        base_url: config.llm.base_url.clone(),
        model: config.llm.model.clone(),
        timeout: Duration::from_secs_f64(config.llm_timeout_s),
        temperature: config.llm.temperature,
        ..ChatClientConfig::default()
    })?);

    // Service credential toward capability servers: a short-lived signed
    // token in production, the fixed dev literal otherwise.
    let bearer = match config.mode {
        DeploymentMode::Development => "dev-token".to_owned(),
        DeploymentMode::Production => {
            let secret = std::env::var(&config.service_token_secret_env)
                .with_context(|| format!("reading {}", config.service_token_secret_env))?;
            mint_service_token("orchestrator", secret.as_bytes(), config.service_token_ttl_s)
        }
    };
    let factory = Arc::new(HttpTransportFactory::new(
        bearer,
        Duration::from_secs_f64(config.tool_timeout_s),
    ));

    let state = AppState::build(&config, chat, factory, db);

    tracing::info!(
        mode = ?config.mode,
        capabilities = state.registry.len(),
        "curia gateway starting"
    );

    GatewayServer::new(state, bind_addr)
        .start()
        .await
        .context("serving")?;
    Ok(())
}
