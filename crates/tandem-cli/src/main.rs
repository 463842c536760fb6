//! tandem: terminal client for a collaborative listening session.
//!
//! Joins one session, runs a single command against it and leaves. The
//! host's external player credentials come from `TANDEM_ACCESS_TOKEN`
//! and `TANDEM_REFRESH_TOKEN`.

mod cli;
mod commands;

use std::path::Path;
use std::process::ExitCode;

use tandem_config::TandemConfig;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn load_config(args: &cli::Args) -> Result<TandemConfig, tandem_common::ConfigError> {
    let mut config = match &args.config {
        Some(path) => tandem_config::load_config_from(Path::new(path))?,
        None => tandem_config::load_config()?,
    };
    if let Some(endpoint) = &args.endpoint {
        config.channel.endpoint = endpoint.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tandem: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_directive = args
        .log_level
        .as_deref()
        .map(|level| format!("tandem={level}"))
        .unwrap_or_else(|| config.logging.directive());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                log_directive
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .init();

    match commands::run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "tandem failed");
            eprintln!("tandem: {e}");
            ExitCode::FAILURE
        }
    }
}
