//! Carry Server - reference authoritative store and wire transport for
//! the carry-engine sync protocol (§6, C9/C10).

use carry_server::config::Config;
use carry_server::{build_router, db, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carry_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Carry Server on {}:{}", config.host, config.port);

    let pool = db::create_pool(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(pool, config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
