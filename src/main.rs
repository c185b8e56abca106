use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tiime_carddav::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config = GatewayConfig::from_env()?;
    info!(
        target: "tiime_carddav",
        "tiime-carddav starting: RUST_LOG='{}', addr={}, layout={:?}",
        rust_log, config.addr, config.layout
    );

    tiime_carddav::server::run(config).await
}
