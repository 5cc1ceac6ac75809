//! PgBus CLI - Main entry point
//!
//! Without a subscription id, publishes a `test` event every few seconds.
//! With one, consumes that subscription and logs every event.

use anyhow::Context;
use clap::Parser;
use pgbus_bus::{Event, PgEventBus};
use pgbus_core::BusConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "pgbus")]
#[command(about = "PgBus - durable event bus on PostgreSQL", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL (overrides the config file and DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Seconds between published events in producer mode
    #[arg(long, default_value_t = 3)]
    interval: u64,

    /// Subscription id; runs as a consumer when given
    subscription: Option<String>,
}

impl Cli {
    fn bus_config(&self) -> anyhow::Result<BusConfig> {
        let mut config = match &self.config {
            Some(path) => BusConfig::from_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => BusConfig::default(),
        }
        .with_env_overrides();
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        Ok(config)
    }
}

async fn produce(bus: &PgEventBus, interval: Duration) -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(interval).await;
        bus.publish(&Event::generate("test")).await?;
    }
}

async fn consume(bus: &PgEventBus, subscription_id: &str) -> anyhow::Result<()> {
    info!(subscription = subscription_id, "Starting consumer");
    let mut subscription = bus.subscribe(subscription_id)?;

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            next = subscription.next() => match next {
                Ok(event) => {
                    info!(event_id = %event.id, event_type = %event.event_type, "Received")
                }
                Err(e) => break Err(e.into()),
            },
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    subscription.close().await?;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut bus = PgEventBus::new(cli.bus_config()?);
    bus.start().await?;

    let result = match cli.subscription.as_deref() {
        None => {
            info!("Running as producer");
            tokio::select! {
                result = produce(&bus, Duration::from_secs(cli.interval)) => result,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
        Some(subscription_id) => consume(&bus, subscription_id).await,
    };

    bus.stop().await?;
    result
}
