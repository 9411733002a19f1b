//! rvc-infer CLI
//!
//! Loads a voice-conversion model, runs one forward pass over the samples
//! given on the command line and prints the result for the calling process.

use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::debug;

use rvc_infer::cli::{commands, Cli};
use rvc_infer::RvcError;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logger; stderr only, stdout belongs to the host
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_filter())).init();

    debug!("rvc-infer v{}", env!("CARGO_PKG_VERSION"));

    match commands::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<RvcError>() {
        Some(rvc) => {
            eprintln!("error[{}]: {:#}", rvc.error_code(), err);
            for suggestion in rvc.recovery_suggestions() {
                eprintln!("  hint: {}", suggestion);
            }
        }
        None => eprintln!("error: {:#}", err),
    }
}
