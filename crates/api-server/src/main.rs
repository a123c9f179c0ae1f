use anyhow::Result;
use api_server::{app, AppState};
use chakra_core::{CoreConfig, OptionsChainProvider, RunMode};
use decision_store::DecisionStore;
use eval_engine::{EvaluationEngine, HttpChainProvider, StaticChainProvider};
use heartbeat::HeartbeatManager;
use market_store::MarketStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    tracing::info!("Starting ChakraOps core");

    let config = CoreConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Run mode: {}", config.run_mode.as_str());
    tracing::info!("  Heartbeat interval: {}s", config.heartbeat_interval_seconds);
    tracing::info!("  Output dir: {}", config.output_dir);
    tracing::info!(
        "  Price range: ${} - ${} (target ${} - ${})",
        config.min_price,
        config.max_price,
        config.target_low,
        config.target_high
    );

    // Ensure the database directory exists before sqlite opens it
    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let store = MarketStore::connect(&config.database_url).await?;
    tracing::info!("Market store initialized (schema ready)");

    let decisions = Arc::new(DecisionStore::new(&config.output_dir)?);
    tracing::info!("Decision store ready at {}", config.output_dir);

    // Chain provider: HTTP when configured, a fixture provider under MOCK,
    // otherwise stage 2 is NOT_RUN.
    let provider: Option<Arc<dyn OptionsChainProvider>> = match &config.chain_base_url {
        Some(base_url) => {
            tracing::info!("Options chain provider: HTTP ({base_url})");
            Some(Arc::new(HttpChainProvider::new(
                base_url.clone(),
                config.chain_token.clone(),
                config.chain_timeout_seconds,
            )?))
        }
        None if config.run_mode == RunMode::Mock => {
            tracing::info!("Options chain provider: static fixtures (MOCK mode)");
            Some(Arc::new(StaticChainProvider::new()))
        }
        None => {
            tracing::warn!("No chain provider configured; stage 2 selection disabled");
            None
        }
    };

    let engine = Arc::new(EvaluationEngine::new(
        store.clone(),
        Arc::clone(&decisions),
        provider.clone(),
        config.clone(),
    ));
    tracing::info!("Evaluation engine initialized");

    let manager = HeartbeatManager::new(store.clone(), provider, config.clone());
    manager.start();

    let state = AppState {
        store,
        decisions,
        engine,
        heartbeat: manager.clone(),
        config: Arc::new(config.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    let shutdown_manager = manager.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received SIGINT, shutting down");
            }
            shutdown_manager.stop().await;
        })
        .await?;

    Ok(())
}
