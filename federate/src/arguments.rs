//! Parse the arguments of the `federate` binary.
//!
//! ```txt
//! federate <config> <log_time> <role> <stop_time> <delta_time> <message_size> [--timeout <seconds>] [--seed <seed>]
//! ```
//!
//! Arguments are validated before the federate connects to the federation, failing with a
//! descriptive [Error] rather than continuing with partially parsed values.

use crate::{lifecycle::Settings, role::Role};
use clap::{Arg, ArgMatches, Command};
use std::{ffi::OsString, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

pub const CONFIG: &str = "config";
pub const LOG_TIME: &str = "log_time";
pub const ROLE: &str = "role";
pub const STOP_TIME: &str = "stop_time";
pub const DELTA_TIME: &str = "delta_time";
pub const MESSAGE_SIZE: &str = "message_size";
pub const TIMEOUT: &str = "timeout";
pub const SEED: &str = "seed";

/// Errors that can occur when parsing arguments.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Clap(#[from] clap::Error),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("{name} is not a number: {value}")]
    NotANumber { name: &'static str, value: String },
    #[error("{name} is out of range (expected {expected}): {value}")]
    OutOfRange {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Validated arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Arguments {
    pub config: PathBuf,
    pub log_time: bool,
    pub role: Role,
    pub stop_time: f64,
    pub delta_time: f64,
    pub timeout: Option<Duration>,
    pub seed: Option<u64>,
}

/// Returns the command definition.
///
/// Positional arguments are optional to clap so that a missing one is reported as
/// [Error::MissingArgument].
pub fn command() -> Command {
    Command::new("federate")
        .version(crate::crate_version())
        .about("Run a time-stepped federate that produces or relays string signals.")
        .arg(Arg::new(CONFIG).help("Path to the federate configuration (.json, .yaml, .yml)"))
        .arg(numeric(LOG_TIME).help("Write timeDataLogging.csv (0 = no, 1 = yes)"))
        .arg(numeric(ROLE).help("Federate role (0 = relay, 1 = producer)"))
        .arg(numeric(STOP_TIME).help("Simulation stop time in seconds"))
        .arg(numeric(DELTA_TIME).help("Step delta in seconds"))
        .arg(numeric(MESSAGE_SIZE).help("Characters in each produced payload"))
        .arg(
            numeric(TIMEOUT)
                .long(TIMEOUT)
                .help("Seconds to wait on any blocking federation call"),
        )
        .arg(
            Arg::new(SEED)
                .long(SEED)
                .help("Seed for produced payloads"),
        )
}

/// An argument whose value may start with `-`.
fn numeric(name: &'static str) -> Arg {
    Arg::new(name).allow_negative_numbers(true)
}

fn required<'a>(matches: &'a ArgMatches, name: &'static str) -> Result<&'a str, Error> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or(Error::MissingArgument(name))
}

fn number<T: FromStr>(name: &'static str, value: &str) -> Result<T, Error> {
    value.trim().parse::<T>().map_err(|_| Error::NotANumber {
        name,
        value: value.to_string(),
    })
}

fn flag(name: &'static str, value: &str) -> Result<bool, Error> {
    match number::<u8>(name, value)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::OutOfRange {
            name,
            value: value.to_string(),
            expected: "0 or 1",
        }),
    }
}

fn positive(name: &'static str, value: &str) -> Result<f64, Error> {
    let parsed = number::<f64>(name, value)?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err(Error::OutOfRange {
            name,
            value: value.to_string(),
            expected: "a finite number > 0",
        });
    }
    Ok(parsed)
}

impl Arguments {
    /// Parse arguments from an iterator (the first item is the program name).
    pub fn parse_from<I, T>(args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args)?;
        Self::from_matches(&matches)
    }

    /// Validate arguments already matched by [command].
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, Error> {
        let config = PathBuf::from(required(matches, CONFIG)?);
        let log_time = flag(LOG_TIME, required(matches, LOG_TIME)?)?;
        let producer = flag(ROLE, required(matches, ROLE)?)?;
        let stop_time = positive(STOP_TIME, required(matches, STOP_TIME)?)?;
        let delta_time = positive(DELTA_TIME, required(matches, DELTA_TIME)?)?;
        let message_size = number::<usize>(MESSAGE_SIZE, required(matches, MESSAGE_SIZE)?)?;
        let timeout = matches
            .get_one::<String>(TIMEOUT)
            .map(|value| positive(TIMEOUT, value).map(Duration::from_secs_f64))
            .transpose()?;
        let seed = matches
            .get_one::<String>(SEED)
            .map(|value| number::<u64>(SEED, value))
            .transpose()?;
        let role = if producer {
            Role::Producer { message_size }
        } else {
            Role::Relay
        };
        Ok(Self {
            config,
            log_time,
            role,
            stop_time,
            delta_time,
            timeout,
            seed,
        })
    }

    /// Settings handed to the federate.
    pub fn settings(&self) -> Settings {
        Settings {
            role: self.role,
            stop_time: self.stop_time,
            delta_time: self.delta_time,
            timeout: self.timeout,
        }
    }
}
