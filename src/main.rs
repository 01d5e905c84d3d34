//! Shortener - URL shortener with accounts and cookie sessions

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shortener::{
    api::{self, AppState},
    config::Config,
    db,
    services::SmtpEmailSender,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shortener=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting shortener...");

    // Load configuration; missing secrets stop startup before anything binds
    let config = Config::load_with_env(Path::new("config.yml"))?;
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Outbound email
    let sender = SmtpEmailSender::boxed(&config.email)?;
    tracing::info!("SMTP relay configured: {}", config.email.smtp_host);

    // Build application state and router
    let state = AppState::new(pool.clone(), &config, sender)?;
    let app = api::build_router(state, &config.server.cors_origin)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    pool.close().await;

    Ok(())
}
