mod api;
mod identity;
mod ui;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use api::ApiClient;
use ui::app::TerminalApp;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,hearth=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let api_client = ApiClient::from_env();
    tracing::info!("Backend API: {}", api_client.base_url());
    if std::env::var("HEARTH_BACKEND_TOKEN")
        .ok()
        .map(|token| token.trim().is_empty())
        .unwrap_or(true)
    {
        tracing::warn!(
            "HEARTH_BACKEND_TOKEN is unset/empty; requests will fail unless backend auth mode is disabled"
        );
    }

    let user_id = identity::resolve_user_id().context("failed to resolve user id")?;

    let rt = tokio::runtime::Runtime::new().context("failed to start client runtime")?;
    rt.block_on(async move {
        let (event_tx, event_rx) = flume::unbounded();
        tokio::spawn(api_client.clone().stream_events_forever(event_tx));
        TerminalApp::new(api_client, user_id, event_rx).run().await
    })
}
