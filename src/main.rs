//! fontdepot - Self-hosted web font subsets
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use fontdepot::cli::{commands, Cli, Commands};
use fontdepot::config::{Config, ConfigManager};
use fontdepot::error::FontDepotResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            } else if e.is_retryable() {
                eprintln!("{} The failure may be transient; try again", style("Hint:").yellow());
            }
            ExitCode::from(e.kind().exit_code())
        }
    }
}

async fn run() -> FontDepotResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);
    fontdepot::ui::init_theme();
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::List(args) => commands::list(args, &config).await,
        Commands::Css(args) => commands::css(args, &config).await,
        Commands::Fetch(args) => commands::fetch(args, &config).await,
        Commands::Warm(args) => commands::warm(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
        Commands::Cache(args) => commands::cache(args, &config).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug. Logs go to stderr so stdout stays
/// clean for CSS and JSON output.
fn init_logging(verbose: u8, config: &Config) {
    let level = match verbose {
        0 if config.general.verbose => 1,
        n => n,
    };
    let filter = match level {
        0 => EnvFilter::new("fontdepot=warn"),
        1 => EnvFilter::new("fontdepot=info"),
        _ => EnvFilter::new("fontdepot=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
