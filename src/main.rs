use std::sync::Arc;

use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use nutshell::{
    config::AppConfig,
    default_handlers,
    llm::{LanguageModel, OpenAiChatModel},
    routes::create_router,
    state::AppState,
    store::pg::{init_pool_with_size, run_migrations, PgStore},
    Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        model = %config.openai_model,
        model_configured = config.openai_api_key.is_some(),
        "loaded configuration"
    );

    let pool = init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    run_migrations(&pool)?;
    let store = Arc::new(PgStore::new(pool));

    let model = OpenAiChatModel::from_config(&config)?
        .map(|model| Arc::new(model) as Arc<dyn LanguageModel>);
    if model.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; sentiment defaults to neutral and extraction is disabled");
    }

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let poll_interval = config.worker_poll_interval();
    let state = AppState::new(config, store, model);

    // Extraction results are published on this process's hub.
    let worker = Worker::new(Arc::new(state.clone()), default_handlers(), poll_interval);
    tokio::spawn(async move { worker.run().await });

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("server received shutdown signal");
        })
        .await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
