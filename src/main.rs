use credit_ledger::{
    Ledger, Result,
    config::settings::{DEFAULT_CONFIG_PATH, load_config_or_default},
};
use dotenvy::dotenv;
use std::env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; DATABASE_URL may come from here
    dotenv().ok();

    // 3. Load ledger settings
    let config_path = env::var("LEDGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config_or_default(&config_path)
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;
    info!(path = %config_path, "Configuration loaded");

    // 4. Connect and make sure the schema exists
    let ledger = Ledger::connect(&config)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    if ledger.initialize_schema_if_needed().await? {
        info!("Created ledger schema");
    }

    // 5. Verify the backend answers
    ledger
        .health_check()
        .await
        .inspect_err(|e| error!("Database health check failed: {}", e))?;

    info!("Credit ledger ready");
    Ok(())
}
