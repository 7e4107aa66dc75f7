use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use slotbook::clock::SystemClock;
use slotbook::config::AppConfig;
use slotbook::db::Store;
use slotbook::handlers;
use slotbook::services::booking::BookingEngine;
use slotbook::services::messaging::logging::LogDispatcher;
use slotbook::services::messaging::telegram::TelegramDispatcher;
use slotbook::services::messaging::Dispatcher;
use slotbook::services::notifier::run_notifier;
use slotbook::services::policy::BookingPolicy;
use slotbook::services::rate_limit::RateLimiter;
use slotbook::services::sweeper::run_sweeper;
use slotbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store = Arc::new(Store::open(&config.database_url, config.store_lock_timeout)?);
    let clock = Arc::new(SystemClock::new(config.utc_offset_hours)?);
    let policy = BookingPolicy {
        cancel_cutoff_secs: config.cancel_cutoff_secs,
        penalty_daily_limit: config.penalty_daily_limit,
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(BookingEngine::new(store, clock, policy, events_tx));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_window,
        config.rate_limit_max_hits,
    ));

    let dispatcher: Arc<dyn Dispatcher> = if config.bot_token.is_empty() {
        tracing::warn!("BOT_TOKEN not set, notifications will only be logged");
        Arc::new(LogDispatcher)
    } else {
        tracing::info!("delivering notifications via {}", config.telegram_api_url);
        Arc::new(TelegramDispatcher::new(
            config.telegram_api_url.clone(),
            config.bot_token.clone(),
        ))
    };

    let shutdown = CancellationToken::new();
    let notifier = tokio::spawn(run_notifier(events_rx, dispatcher));
    let sweeper = tokio::spawn(run_sweeper(
        engine.clone(),
        limiter.clone(),
        config.sweep_interval,
        config.draft_ttl,
        shutdown.clone(),
    ));

    let state = Arc::new(AppState {
        engine,
        limiter,
        config: config.clone(),
    });
    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            token.cancel();
        })
        .await?;

    // The router held the last engine handle besides the sweeper; once the
    // sweeper exits every event sender is gone and the notifier drains out.
    shutdown.cancel();
    sweeper.await?;
    notifier.await?;

    Ok(())
}
