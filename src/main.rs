//! spidermap - headless-browser resource capture with source map reconstruction.
//!
//! CLI entry point.

use clap::Parser;
use spidermap::console::ConsoleOutput;
use spidermap::{Commands, Config, CrawlConfig, SetupConfig, Spider};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Exit code after an interrupt, as shells report SIGINT.
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let default_filter = if config.verbose {
        "spidermap=debug,info"
    } else {
        "spidermap=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Dropping the crawl future drops every live browser, which kills Chrome.
    tokio::select! {
        code = run(config) => code,
        _ = shutdown_signal() => {
            eprintln!("\nSignal received, shutting down browsers...");
            ExitCode::from(INTERRUPTED)
        }
    }
}

async fn run(config: Config) -> ExitCode {
    let result = match config.command.clone() {
        Commands::Crawl(crawl_config) => run_crawl(crawl_config, config.verbose).await,
        Commands::Setup(setup_config) => run_setup(setup_config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            }
            _ => {
                error!("Failed to register signal handlers");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn run_crawl(crawl_config: CrawlConfig, verbose: bool) -> Result<(), ExitCode> {
    let targets = match crawl_config.load_targets() {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to load targets: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    let console = ConsoleOutput::new(verbose, crawl_config.json);
    console.print_banner();
    console.print_info(&format!(
        "Output: {} | Timeout: {}s | Headless: {}",
        crawl_config.output.display(),
        crawl_config.timeout,
        !crawl_config.headed
    ));
    if let Some(ref proxy) = crawl_config.proxy {
        console.print_info(&format!("Proxy: {}", proxy));
    }

    let spider = match Spider::new(crawl_config, console) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    let target_count = targets.len();
    let summaries = spider.crawl_multiple(targets).await;

    for summary in &summaries {
        console.print_summary(summary);
    }

    // A lone target that failed is a failed run; batches report per target.
    if target_count == 1 && summaries.iter().any(|s| s.error.is_some()) {
        return Err(ExitCode::FAILURE);
    }

    Ok(())
}

async fn run_setup(setup_config: SetupConfig) -> Result<(), ExitCode> {
    eprintln!("Setting up Chromium browser...");
    match spidermap::browser::download_chrome(setup_config.force).await {
        Ok(path) => {
            eprintln!("Chromium ready at: {}", path.display());
            Ok(())
        }
        Err(e) => {
            error!("Setup failed: {}", e);
            Err(ExitCode::FAILURE)
        }
    }
}
