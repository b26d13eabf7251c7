mod service;
mod settings;

use fleeting_core::Store;
use settings::Settings;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleeting_server=info,fleeting_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration from environment variables; missing credentials stop us here
    let settings = Settings::from_env()?;
    let config = settings.registry_config();
    let addr = format!("{}:{}", settings.host, settings.port);
    let backend = settings.backend.build()?;

    let store = Store::open(config, backend).await;
    let app = service::router(store.clone());

    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("🚀 Fleeting HTTP server listening on {}", listener.local_addr()?);
    tracing::info!("   Backend: {}", store.backend_name());
    tracing::info!("   Expiration window: {} min", settings.expiration_minutes);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
