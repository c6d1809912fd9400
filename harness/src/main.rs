//! vkt CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use vkt::config::{process_env_set, Cli, Config};
use vkt::HarnessError;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match real_main(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}

fn real_main(cli: &Cli) -> Result<(), HarnessError> {
    let config = Config::from_cli(cli, process_env_set)?;
    if cli.list_devices {
        return vkt::list_devices(config.validation, &config.preferences);
    }

    let report = vkt::run(&config)?;
    println!(
        "{}: {} words = {:#010x}, {:.3} ms on device (memory type {}, {} bytes allocated)",
        report.device,
        report.words_verified,
        report.expected,
        report.elapsed_ns / 1e6,
        report.memory_type,
        report.allocation_size,
    );
    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
