use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use rasid::agent::Agent;
use rasid::config::BotConfig;
use rasid::resolve::NameResolver;
use rasid::transport::telegram::TelegramTransport;
use rasid::transport::ChatTransport;

const STATUS_LOG_INTERVAL_SECS: u64 = 300;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rasid=debug")),
        )
        .init();

    let config = BotConfig::load();
    config.validate().context("invalid configuration")?;

    let resolver = NameResolver::load(config.resolver.clone(), config.state_path())
        .context("failed to open the name mapping store")?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(async move {
        let transport: Arc<dyn ChatTransport> = TelegramTransport::connect(&config.transport)
            .await
            .context("failed to connect to the chat transport")?;

        let agent = Arc::new(Agent::new(config, transport, resolver));

        let status_agent = Arc::clone(&agent);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(tokio::time::Duration::from_secs(
                STATUS_LOG_INTERVAL_SECS,
            ));
            tick.tick().await; // first tick fires immediately
            loop {
                tick.tick().await;
                let status = status_agent.status().await;
                tracing::info!(
                    "Status: {} | names learned: {}",
                    status.status_text,
                    status.tokens_learned
                );
            }
        });

        let signal_agent = Arc::clone(&agent);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                signal_agent.shutdown();
            }
        });

        agent.run().await
    })
}
