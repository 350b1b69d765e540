use std::sync::Arc;

use anyhow::Context;
use assistant_gateway::{
    app_context::AppContext,
    config::{CliArgs, GatewayConfig},
    logging::init_logging,
    observability::metrics::start_prometheus,
    server, version,
};
use clap::Parser;
use tracing::{info, warn};

#[expect(clippy::print_stdout, reason = "version flags print to the terminal")]
fn print_version(verbose: bool) {
    if verbose {
        println!("{}", version::get_verbose_version_string());
    } else {
        println!("{}", version::get_version_string());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    if args.version || args.version_verbose {
        print_version(args.version_verbose);
        return Ok(());
    }

    let config = GatewayConfig::from_args(args)?;
    let _log_guard = init_logging(&config.logging);

    if let Some(port) = config.prometheus_port {
        start_prometheus(&config.server.host, port).context("starting Prometheus exporter")?;
    }

    let providers = config.providers.configured();
    if providers.is_empty() {
        warn!("No provider API keys configured; every model request will fail");
    }
    info!(
        providers = ?providers,
        accounts = ?config.storage.account_backend,
        cache = ?config.storage.cache_backend,
        faceswap = config.faceswap.base_url.is_some(),
        "Configuration loaded"
    );

    version::print_banner(&config.server.host, config.server.port, &providers);

    let ctx = AppContext::from_config(config).map_err(anyhow::Error::msg)?;
    server::startup(Arc::new(ctx)).await
}
