use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webrelay_server::engine::{spawn_engine, EchoEngine, EngineNetwork};
use webrelay_server::state::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webrelay_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting webrelay server...");

    // Load configuration
    let config = Config::load()?;

    // Build the router and shared state
    let (app, state) = webrelay_server::create_app(config.clone()).await?;

    // The engine only talks to the virtual network
    let net = EngineNetwork::new(
        state.network.clone(),
        tokio::runtime::Handle::current(),
        config.engine_poll_timeout,
    );
    spawn_engine(EchoEngine::new(), net).context("Failed to start engine thread")?;

    // Start the server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
