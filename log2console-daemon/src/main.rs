use anyhow::Result;
use clap::Parser;

use log2console_core::config::Log2ConsoleConfig;
use log2console_daemon::cli::DaemonCli;
use log2console_daemon::host::Host;
use log2console_daemon::output::MessagePrinter;
use log2console_daemon::{logging, metrics_server};
use log2console_receivers::ReceiverRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    let registry = ReceiverRegistry::with_defaults();

    if cli.list_receivers {
        print_receivers(&registry)?;
        return Ok(());
    }

    let mut config = Log2ConsoleConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // CLI overrides take precedence over file and environment
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        let host = Host::build(config, &registry)?;
        println!(
            "{}: configuration OK ({} receivers enabled)",
            cli.config.display(),
            host.receivers().len()
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "log2console-daemon starting");

    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)?;
    }

    let printer = MessagePrinter::stdout(&config.output)?;
    let mut host = Host::build(config, &registry)?;
    host.run(printer).await?;

    tracing::info!("log2console-daemon shut down");
    Ok(())
}

fn print_receivers(registry: &ReceiverRegistry) -> Result<()> {
    for (name, label) in registry.list() {
        let sample = registry
            .create_default(name)
            .map(|rx| rx.sample_client_config())
            .map_err(|e| anyhow::anyhow!("{}: {}", name, e))?;
        println!("{name} -- {label}");
        for line in sample.lines() {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}
