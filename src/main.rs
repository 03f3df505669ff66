use dotenvy::dotenv;
use mentor_booking::{
    config::{self, database, users::StaticUserDirectory},
    core::{context::ServiceContext, scheduler},
    errors::{Error, Result},
    gateway::PayOsGateway,
    notify::logging::{LogMailer, LogNotifier},
};
use std::{env, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load settings (file + environment overrides)
    let config_path =
        env::var("MENTOR_BOOKING_CONFIG").unwrap_or_else(|_| config::DEFAULT_CONFIG_PATH.to_string());
    let settings = config::load_settings(&config_path)
        .inspect_err(|e| error!("Critical error loading settings: {}", e))?;

    // 4. Connect and create tables
    let db = database::create_connection(&settings)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|()| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Wire collaborators
    let gateway = PayOsGateway::new(settings.gateway.clone())?;
    let directory = StaticUserDirectory::from_entries(&settings.users);
    info!(users = directory.len(), "User directory loaded");

    let ctx = ServiceContext {
        db,
        settings: Arc::new(settings),
        gateway: Arc::new(gateway),
        notifier: Arc::new(LogNotifier),
        mailer: Arc::new(LogMailer),
        directory: Arc::new(directory),
    };

    // 6. Run the scheduler until Ctrl-C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(scheduler::run(ctx, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .inspect_err(|e| error!("Failed to listen for Ctrl-C: {}", e))?;
    info!("Shutdown requested");

    shutdown_tx.send(true).map_err(|e| Error::Config {
        message: format!("Scheduler already stopped: {e}"),
    })?;
    worker.await.map_err(|e| Error::Config {
        message: format!("Scheduler task failed: {e}"),
    })?;

    info!("Worker stopped");
    Ok(())
}
