use clap::Parser;
use page_scraper::{install_prometheus, load_config, setup_logging, Cli, CliRunner};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let config = load_config(&args).await?;
    setup_logging(&config, args.verbose)?;

    info!("Starting page-scraper v{}", env!("CARGO_PKG_VERSION"));
    info!(
        env = %config.env,
        max_concurrency = config.max_concurrency,
        navigation_timeout_ms = config.navigation_timeout_ms,
        "Configuration loaded"
    );

    let metrics = match install_prometheus() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    let runner = CliRunner::new(config, metrics);
    let result = runner.run(args.command).await;

    runner.shutdown().await;

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("page-scraper stopped");
    Ok(())
}
