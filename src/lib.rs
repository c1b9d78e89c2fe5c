pub mod cli;
pub mod compare;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod ollama;
pub mod report;
pub mod system;
pub mod tiers;

use clap::Parser;
use std::process::ExitCode;

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

pub fn run() -> ExitCode {
    let cli = cli::Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[llmbench] failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[llmbench] {}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
