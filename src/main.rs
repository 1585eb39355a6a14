use restaurant_ordering::{
    config::{database, settings},
    core::{notify::BranchBroadcaster, orders::OrderTransactionEngine},
    errors::Result,
};
use dotenvy::dotenv;
use std::sync::Arc;
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

    // 3. Load the application configuration
    let app_config = settings::load_app_configuration()
        .inspect_err(|e| error!("Failed to load configuration: {e}"))?;
    info!(
        tax_rate = %app_config.ordering.tax_rate,
        strict_transitions = app_config.ordering.strict_transitions,
        "Configuration loaded"
    );

    // 4. Connect and make sure the schema exists
    let db = database::create_connection(&app_config.database)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {e}"))?;
    database::create_tables(&db)
        .await
        .inspect(|()| info!("Database schema ready"))
        .inspect_err(|e| error!("Failed to create tables: {e}"))?;

    // 5. Wire the order engine to the in-process broadcaster
    let broadcaster = Arc::new(BranchBroadcaster::new(
        app_config.notifications.channel_capacity,
    ));
    let engine = OrderTransactionEngine::new(&app_config.ordering, broadcaster);
    info!(
        tax_rate = %engine.pricing().tax_rate(),
        policy = ?engine.states().policy(),
        "Ordering core ready"
    );

    Ok(())
}
