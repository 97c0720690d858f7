//! Run a single federate against an in-process federation.

use federate::{
    arguments::{self, Arguments},
    config, lifecycle, logging, simulated,
    timing::{self, Timings},
};
use rand::{rngs::StdRng, SeedableRng};
use std::{path::Path, process::ExitCode};
use tracing::{error, info};

fn main() -> ExitCode {
    // Create logger
    logging::init(logging::from_env());
    info!(version = federate::crate_version(), "starting federate");

    // Parse arguments
    let arguments = match Arguments::parse_from(std::env::args_os()) {
        Ok(arguments) => arguments,
        Err(arguments::Error::Clap(e)) => e.exit(),
        Err(e) => {
            error!(error = %e, "invalid arguments");
            return lifecycle::exit_code(lifecycle::USAGE_ERROR);
        }
    };

    // Load configuration
    let config = match config::load(&arguments.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = ?e, path = ?arguments.config, "failed to load configuration");
            return lifecycle::exit_code(lifecycle::STARTUP_FAILURE);
        }
    };

    // Run the federate
    let federation = simulated::Federation::new(simulated::Config {
        federates: 1,
        record: false,
    });
    let rng = match arguments.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let outcome = lifecycle::run(&federation, &config, &arguments.settings(), rng);
    if let lifecycle::Outcome::Completed(report) = &outcome {
        if arguments.log_time {
            write_timings(&report.timings, Path::new(timing::FILE));
        }
    }
    info!(name = %config.name, code = outcome.code(), "federate exited");
    outcome.exit_code()
}

fn write_timings(timings: &Timings, path: &Path) {
    match timings.write(path) {
        Ok(()) => info!(?path, "wrote timings"),
        Err(e) => error!(error = ?e, ?path, "failed to write timings"),
    }
}
