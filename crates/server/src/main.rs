use std::time::Duration;

use anyhow::Context;
use server::{routes, shutdown_signal};
use services::services::{config::Config, dispatch::Dispatcher, janitor, slack::SlackClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},executors={level},utils={level}",
        level = log_level
    );
    let filter = EnvFilter::try_new(&filter_string).context("failed to create tracing filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    if config.slack_signing_secret.is_empty() {
        tracing::warn!("SLACK_SIGNING_SECRET is not set; every webhook request will be rejected");
    }
    if config.slack_bot_token.is_empty() {
        tracing::warn!("SLACK_BOT_TOKEN is not set; replies will not be delivered");
    }

    let slack = SlackClient::new(config.slack_bot_token.clone());
    let dispatcher = Dispatcher::new(config.clone(), slack);

    // The registry does not survive restarts, so every worktree on disk is
    // unreachable. Reclaim them before accepting events.
    dispatcher
        .worktrees()
        .purge_all()
        .context("failed to reset the worktree directory")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let janitor = janitor::spawn(
        dispatcher.worktrees().clone(),
        Duration::from_secs(config.sweep_interval_secs),
        config.worktree_retention_hours,
        shutdown_rx,
    );

    let app = routes::router(dispatcher, config.require_https);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = janitor.await;

    Ok(())
}
