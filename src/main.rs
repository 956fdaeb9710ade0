use ai_web_scraper::{api::routes::create_router, config::Config, AppState};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ai_web_scraper=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    // Missing OPENAI_API_KEY or FREE_TIER_LIMIT stops startup here
    let config = Config::load()?;
    let server_addr = config.server_addr;
    let sweep_every = config.session_sweep_interval;
    tracing::info!(
        fetcher = ?config.fetch.kind,
        model = %config.llm.model,
        free_tier_limit = config.free_tier_limit,
        paid_tier = config.paid_license_key.is_some(),
        payments = config.stripe.secret_key.is_some(),
        "Configuration loaded"
    );

    let app_state = AppState::from_config(config)?;
    let sweeper_cancel = CancellationToken::new();
    let sweeper = app_state
        .pipeline
        .gate()
        .spawn_sweeper(sweep_every, sweeper_cancel.clone());
    let app = create_router(app_state);

    let listener = TcpListener::bind(server_addr).await?;
    tracing::info!("Listening on {}", server_addr);
    let served = axum::serve(listener, app).await;

    sweeper_cancel.cancel();
    let _ = sweeper.await;
    served?;

    Ok(())
}
