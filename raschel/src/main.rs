mod application;
mod config;
mod logging;
mod presentation {
    pub mod cli;
}

use std::process::ExitCode;

use clap::Parser;

use crate::application::Status;
use crate::presentation::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_level);
    match application::run(cli) {
        Ok(Status::Clean) => ExitCode::SUCCESS,
        Ok(Status::Partial) => ExitCode::from(1),
        Err(e) => {
            eprintln!("raschel: {e}");
            ExitCode::from(2)
        }
    }
}
