//! # chatwire
//!
//! Realtime chat routing server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (single process, in-memory fabric)
//! chatwire
//!
//! # Run with environment variables
//! CHATWIRE_PORT=8080 CHATWIRE_HOST=0.0.0.0 CHATWIRE_JWT_SECRET=s3cret chatwire
//!
//! # Share traffic between processes through Redis
//! cargo build --release --features redis
//! CHATWIRE_REDIS_URL=redis://127.0.0.1:6379 chatwire
//! ```

use anyhow::Result;
use chatwire_server::{config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "chatwire=debug,chatwire_server=debug,chatwire_core=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting chatwire on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
