use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use verdict_scheduler::app;
use verdict_scheduler::config::SchedulerConfig;
use verdict_scheduler::external::http_analysis_client::HttpAnalysisClient;
use verdict_scheduler::logging::{init_logging, LoggingConfig};
use verdict_scheduler::services::job_scheduler_service::JobSchedulerService;
use verdict_scheduler::services::llm_service::{LlmConfig, LlmService};
use verdict_scheduler::services::output_parser::OutputParser;
use verdict_scheduler::services::scheduler_context::SchedulerContext;
use verdict_scheduler::state::AppState;
use verdict_scheduler::store::{MemoryStore, PgSchedulerStore, SchedulerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let config = SchedulerConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid scheduler configuration: {}", e))?;

    let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string());
    let store: Arc<dyn SchedulerStore> = match backend.to_lowercase().as_str() {
        "memory" => {
            tracing::warn!("🧪 Using in-memory store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
        "postgres" => {
            let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .context("Failed to connect to database")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("🗄️ Connected to PostgreSQL");
            Arc::new(PgSchedulerStore::new(pool))
        }
        other => anyhow::bail!("Invalid STORE_BACKEND: {}. Must be 'postgres' or 'memory'", other),
    };

    let client = HttpAnalysisClient::from_env().context("Failed to create analysis client")?;
    let repair = LlmService::new(LlmConfig::from_env());
    let parser = OutputParser::new(Some(Arc::new(repair)));

    let context = SchedulerContext::new(config, store, Arc::new(client), Arc::new(parser));

    let mut scheduler = JobSchedulerService::new(context.clone()).await?;
    scheduler.start().await?;

    let app = app::create_app(AppState { context });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Verdict scheduler running at http://{}/", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
