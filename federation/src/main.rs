//! Run a manifest of federates against one in-process federation.

use clap::{value_parser, Arg, Command};
use federate::{config::Manifest, lifecycle, logging};
use federation::{crate_version, exit, prepare, run};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};

/// Path to the manifest.
const MANIFEST: &str = "manifest";

/// Directory timing files are written to.
const OUTPUT: &str = "output";

fn main() -> ExitCode {
    // Create logger
    logging::init(logging::from_env());

    // Parse arguments
    let matches = Command::new("federation")
        .version(crate_version())
        .about("Run a manifest of federates together against one in-process federation.")
        .arg(
            Arg::new(MANIFEST)
                .required(true)
                .help("Path to the YAML manifest")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(OUTPUT)
                .long(OUTPUT)
                .default_value(".")
                .help("Directory to write timing files to")
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();
    let (Some(path), Some(output)) = (
        matches.get_one::<PathBuf>(MANIFEST),
        matches.get_one::<PathBuf>(OUTPUT),
    ) else {
        return lifecycle::exit_code(lifecycle::USAGE_ERROR);
    };

    // Load every federate before any of them joins
    let manifest = match Manifest::load(path) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!(error = ?e, ?path, "failed to load manifest");
            return lifecycle::exit_code(lifecycle::STARTUP_FAILURE);
        }
    };
    let participants = match prepare(&manifest) {
        Ok(participants) => participants,
        Err(e) => {
            error!(error = ?e, ?path, "invalid federate");
            return lifecycle::exit_code(lifecycle::STARTUP_FAILURE);
        }
    };
    info!(federates = participants.len(), "starting federation");

    // Run the federation
    let statuses = run(&participants, manifest.seed, output);
    let code = exit(&statuses);
    info!(code, "federation exited");
    lifecycle::exit_code(code)
}
