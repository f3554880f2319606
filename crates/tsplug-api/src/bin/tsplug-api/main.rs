use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tsplug::{
    DefaultPlugin, DispatcherStatsHook, HealthMonitor, InMemoryModelRepository, LogSink,
    ModelRepository, PluginService, PostgresModelRepository,
};
use tsplug_api::{ApiConfig, AppState, build_app};

/// tsplug API Server
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host address to bind to
    #[arg(short = 'H', long, env = "TSPLUG_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "TSPLUG_PORT", default_value_t = 3000)]
    port: u16,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "TSPLUG_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Config file path (.toml or .json)
    #[arg(short, long, env = "TSPLUG_CONFIG")]
    config_file: Option<PathBuf>,

    /// Disable Swagger UI
    #[arg(long, env = "TSPLUG_DISABLE_SWAGGER", default_value_t = false)]
    disable_swagger: bool,

    /// PostgreSQL connection string; model metadata stays in memory without it
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let filter = format!(
        "tsplug={lvl},tsplug_api={lvl},tower_http=debug",
        lvl = cli.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config_file {
        match ApiConfig::load_from_file(config_path) {
            Ok(cfg) => {
                info!("Configuration loaded from: {}", config_path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config file: {}. Using default configuration.",
                    e
                );
                ApiConfig::default()
            }
        }
    } else {
        ApiConfig::default()
    };

    // Override with CLI options
    config.host = cli.host;
    config.port = cli.port;
    config.log_level = cli.log_level;
    config.enable_swagger = !cli.disable_swagger;
    if cli.database_url.is_some() {
        config.database_url = cli.database_url;
    }

    let addr = config.socket_addr()?;

    // Initialize repository and engine
    let repository: Arc<dyn ModelRepository> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            info!("Model metadata: PostgreSQL");
            Arc::new(PostgresModelRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, model metadata is kept in memory");
            Arc::new(InMemoryModelRepository::new())
        }
    };
    let service = PluginService::from_config(
        Arc::new(DefaultPlugin),
        repository,
        Arc::new(LogSink),
        config.service.clone(),
    );
    info!(
        plugin = service.plugin_name(),
        workers = config.service.worker_count,
        "Plugin service ready"
    );

    let monitor = HealthMonitor::new(config.service.monitor_interval())
        .with_hook(Arc::new(DispatcherStatsHook::new(service.dispatcher().clone())));
    let monitor_shutdown = monitor.shutdown_handle();
    let monitor_task = tokio::spawn(async move { monitor.run().await });

    // Build application
    let app = build_app(AppState::new(service.clone()), &config);

    // Start server
    info!("Starting server on: {}", addr);
    if config.enable_swagger {
        info!("Swagger UI: http://{}/swagger-ui", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Draining background jobs");
    monitor_shutdown.notify_one();
    service.shutdown().await;
    if let Err(e) = monitor_task.await {
        warn!("Health monitor ended abnormally: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
