use clap::Parser;
use exn::ResultExt;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod error;

/// `RUST_LOG` wins over the configured filter. Logs go to stderr, so that
/// stdout only ever carries command output.
fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    let config = match cairn_config::Config::load(cli.config.as_deref()).or_raise(|| error::ErrorKind::Config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:?}");
            return ExitCode::FAILURE;
        },
    };
    init_tracing(&config.log.filter);

    match commands::run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("{e:?}");
            ExitCode::FAILURE
        },
    }
}
