//! Traffic Warden daemon entry point

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use traffic_warden::chat::{ChatApi, DiscordClient};
use traffic_warden::config::WardenConfig;
use traffic_warden::pointer::PointerStore;
use traffic_warden::provider::{HetznerClient, ProviderApi};
use traffic_warden::reconciler::MessageReconciler;
use traffic_warden::report::ReportComposer;
use traffic_warden::scheduler::{wait_for_shutdown, ScheduledTask};
use traffic_warden::warden::Warden;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("traffic_warden=info")),
        )
        .init();

    info!("Traffic Warden v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = WardenConfig::from_env().context("Invalid configuration")?;
    info!(
        credentials = config.credentials.len(),
        notify = config.thresholds.notify_percent(),
        kill = config.thresholds.kill_percent(),
        every = %humantime::format_duration(config.refresh_interval),
        "Configuration loaded"
    );

    let chat: Arc<dyn ChatApi> = Arc::new(
        DiscordClient::new(config.chat_token.clone(), config.http_timeout)
            .context("Failed to build chat client")?,
    );
    let user = chat.login().await.context("Chat login failed")?;
    info!(user = %user, "Logged in to chat");

    match chat.fetch_channel(&config.channel_id).await {
        Ok(channel) => info!(
            channel_id = %channel.id,
            channel = channel.name.as_deref().unwrap_or("?"),
            "Report channel resolved"
        ),
        Err(e) => warn!(channel_id = %config.channel_id, error = %e, "Report channel could not be fetched"),
    }

    let provider: Arc<dyn ProviderApi> = Arc::new(
        HetznerClient::new(config.http_timeout).context("Failed to build provider client")?,
    );

    let mut reconciler = MessageReconciler::new(
        chat.clone(),
        config.channel_id.clone(),
        PointerStore::new(config.state_file.clone()),
    )
    .with_seed_message(config.seed_message_id.clone());
    reconciler.prepare(config.startup).await;

    let warden = Warden::new(
        provider,
        config.credentials.clone(),
        config.thresholds,
        ReportComposer::new(config.composer_options()),
        reconciler,
    );

    let task = ScheduledTask::spawn(config.refresh_interval, warden);

    wait_for_shutdown(tokio::signal::ctrl_c()).await;
    info!("Shutdown requested, waiting for the current cycle");
    task.cancel().await;

    Ok(())
}
