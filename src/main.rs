use anyhow::Context;
use autoparts::{
    app::{cors_layer, router, AppState},
    config::Config,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine, the variables may come from the environment
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "autoparts=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let app_state = AppState::new(&config)
        .await
        .context("cannot create MongoDB client")?;
    app_state
        .run_migration()
        .await
        .context("database migration failed")?;

    let cors = cors_layer(config.cors_origin.as_deref()).context("invalid CORS_ORIGIN")?;
    let app = router(app_state, cors);

    tracing::info!("listening on {}", config.bind_address);

    axum::Server::bind(&config.bind_address)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
