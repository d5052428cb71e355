use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use calltest::cli::{self, Args, Command};
use calltest::config::Config;
use calltest::dialplan::redact_number;
use calltest::orchestrator;

fn init_logging(args: &Args) -> Result<()> {
    let mut filter = EnvFilter::from_default_env().add_directive(
        args.base_directive()
            .parse()
            .context("Invalid log level")?,
    );
    for directive in &args.log {
        filter = filter.add_directive(
            directive
                .parse()
                .with_context(|| format!("Invalid --log directive '{}'", directive))?,
        );
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn list_checks(config: &Config) {
    for (name, call) in &config.calls {
        let marker = if call.skip { " (manual)" } else { "" };
        if call.info.is_empty() {
            println!("{} [{}]{}", name, call.mode, marker);
        } else {
            println!("{} [{}]{}: {}", name, call.mode, marker, call.info);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args()?;

    if args.command == Command::Help {
        cli::print_help();
        return Ok(());
    }

    init_logging(&args)?;

    info!("calltest v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env(args.config.as_deref())?;
    info!("Configuration loaded");
    info!(
        "  Controller: {} at {}:{}",
        config.controller.backend, config.controller.host, config.controller.port
    );
    for (name, link) in &config.links {
        info!(
            "  Link {}: {}",
            name,
            link.number.as_deref().map(redact_number).unwrap_or_else(|| "-".into())
        );
    }

    match &args.command {
        Command::Validate => {
            info!("Validating configuration...");
            match config.validate() {
                Ok(()) => {
                    info!("Configuration is valid");
                    return Ok(());
                }
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::List => {
            list_checks(&config);
            return Ok(());
        }
        Command::DumpConfig => {
            print!("{}", config.dump()?);
            return Ok(());
        }
        _ => {}
    }

    let runtime = orchestrator::bootstrap(config)?;

    if let Command::Once(names) = &args.command {
        info!("Running checks once (--once mode)");
        let results = runtime.run_once(names).await?;
        let mut failed = 0;
        for (name, outcome) in &results {
            if outcome.is_failure() {
                failed += 1;
                warn!("{}: {:?}", name, outcome);
            }
        }
        info!("{} of {} checks passed", results.len() - failed, results.len());
        if failed > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal, stopping..."),
                Err(e) => {
                    error!("Failed to listen for shutdown signal: {}", e);
                    return;
                }
            }
            shutdown.cancel();
        });
    }

    runtime.serve(shutdown).await?;
    info!("Shutdown complete");
    Ok(())
}
