use anyhow::Result;
use tokio::task::JoinSet;

use throttlegate_server::config::Config;
use throttlegate_server::factory::Components;
use throttlegate_server::transport::{Gateway, Transport, http::HttpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("throttlegate={}", config.log_level).parse()?)
                .add_directive(format!("throttlegate_server={}", config.log_level).parse()?),
        )
        .init();

    let components = Components::from_config(&config)?;

    let mut transport_tasks = JoinSet::new();
    let transport = HttpTransport::new(&config.http.host, config.http.port)?;
    let gateway = Gateway::from(&components);
    transport_tasks.spawn(async move { transport.start(gateway).await });

    tracing::info!(
        max_requests = config.sliding_window.max_requests,
        horizon_secs = config.sliding_window.horizon().as_secs(),
        bucket_tokens = config.token_bucket.max_tokens,
        max_concurrency = config.queue.max_concurrency,
        "ThrottleGate server started"
    );

    let outcome = tokio::select! {
        result = transport_tasks.join_next() => match result {
            Some(Ok(Ok(()))) | None => {
                tracing::info!("Transport task completed");
                Ok(())
            }
            Some(Ok(Err(e))) => {
                tracing::error!("Transport task failed: {}", e);
                Err(e)
            }
            Some(Err(e)) => {
                tracing::error!("Transport task panicked: {}", e);
                Err(anyhow::anyhow!("Transport task panicked"))
            }
        },
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            signal.map_err(anyhow::Error::from)
        }
    };

    transport_tasks.shutdown().await;
    // Pending work fails with QueueClosed; running work finishes on its own
    components.queue.close();
    components.shutdown().await;
    tracing::info!(
        uptime_secs = components.metrics.uptime_seconds(),
        "ThrottleGate server stopped"
    );

    outcome
}
