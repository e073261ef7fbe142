use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{ApiState, router};
use medata_core::{FixtureSet, HarnessConfig, MedicalStore, MemoryStore, StoreBackend, open_store};

/// Main entry point for the reference medical-data API
///
/// Serves `/health` and the `/api/v1` patient endpoints over the configured store. With the
/// in-memory store the standard dataset is loaded under bare keys (`P0001`, `T1`, ...), so the
/// server can be explored by hand or used as a target for `medata run`.
///
/// # Environment Variables
/// - `MEDATA_ADDR`: Server address (default: "0.0.0.0:8000")
/// - `API_KEY`: Key expected in `X-API-Key` (default: "test_api_key")
/// - `STORE_BACKEND`: `memory` (seeded) or `postgres`
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If configuration, seeding or serving fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medata_run=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = HarnessConfig::from_env()?;
    let addr = std::env::var("MEDATA_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());

    let store: Arc<dyn MedicalStore> = match config.store {
        StoreBackend::Memory => {
            let store: Arc<dyn MedicalStore> = Arc::new(MemoryStore::new());
            let set = FixtureSet::unscoped()?;
            store.insert_fixtures(&set).await?;
            tracing::info!("Loaded {} demo rows into the in-memory store", set.row_count());
            store
        }
        StoreBackend::Postgres => open_store(&config)?,
    };

    tracing::info!("++ Starting medical-data API on {}", addr);

    let app = router(ApiState::new(store, &config.api.api_key));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
