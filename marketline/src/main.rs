//! Entrypoint binary: wires the control plane (C8) and, depending on
//! `config.role`, the ingester role (C1-C5), the storage role (C6-C7), or
//! both co-located in one process (spec §4.8).

mod ingester;
mod storage;

use marketline_control::config::{Config, Role};
use marketline_control::Runtime;
use std::time::Duration;
use tracing::info;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(cfg!(debug_assertions))
        .json()
        .init()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    info!(role = ?config.role, "loading marketline config");

    let mut runtime = Runtime::start(config);

    match runtime.config.role {
        Role::Ingester => ingester::start(&mut runtime).await?,
        Role::Storage => storage::start(&mut runtime).await?,
        Role::Combined => {
            ingester::start(&mut runtime).await?;
            storage::start(&mut runtime).await?;
        }
    }

    info!("marketline running, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining components");

    runtime.stop(SHUTDOWN_GRACE).await;
    Ok(())
}
