//! Run a federate from connection to cleanup, classifying every failure along the way.
//!
//! [run] is the fault boundary of a federate. Failures are sorted into three classes:
//!
//! * Startup: the federate could not be constructed or could not join the federation. The federate
//!   reports nothing itself; a federation that rejects it may still release waiting peers.
//! * Known: an [Error] surfaced after joining. It is reported to the federation with
//!   [KNOWN_FAILURE] and its message.
//! * Unknown: a panic unwound after joining. It is reported with [UNKNOWN_FAILURE] and
//!   [UNKNOWN_MESSAGE].
//!
//! Whatever happens after joining, the handle is finalized exactly once and the federation is
//! cleaned up.

use crate::{
    catalog::Catalog,
    clock::Clock,
    config,
    execution::{Federate, State, Summary},
    role::Role,
    timing::{Stopwatch, Timings},
    Error, Federation, Handle,
};
use rand::Rng;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    process::ExitCode,
    time::Duration,
};
use tracing::{error, info, warn};

/// Process completed normally.
pub const SUCCESS: i32 = 0;

/// Configuration could not be loaded or the federate could not join the federation.
pub const STARTUP_FAILURE: i32 = 1;

/// Arguments could not be parsed.
pub const USAGE_ERROR: i32 = 2;

/// A recognized error aborted the federate.
pub const KNOWN_FAILURE: i32 = -2;

/// An unexpected panic aborted the federate.
pub const UNKNOWN_FAILURE: i32 = -3;

/// Message reported to the federation for [UNKNOWN_FAILURE].
pub const UNKNOWN_MESSAGE: &str = "Unknown and unexpected error thrown";

/// Convert a status code to a process exit code (negative codes wrap, as they would in a shell).
pub fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}

/// Parameters of a federate run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settings {
    pub role: Role,
    pub stop_time: f64,
    pub delta_time: f64,
    /// Bound on every blocking federation call (`None` waits forever).
    pub timeout: Option<Duration>,
}

/// Result of a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub name: String,
    pub summary: Summary,
    pub timings: Timings,
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    Completed(Report),
    Startup(Error),
    Failed(Error),
    Panicked(String),
}

impl Outcome {
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Completed(_) => SUCCESS,
            Outcome::Startup(_) => STARTUP_FAILURE,
            Outcome::Failed(_) => KNOWN_FAILURE,
            Outcome::Panicked(_) => UNKNOWN_FAILURE,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        exit_code(self.code())
    }
}

/// Owns a [Handle] and finalizes it exactly once, at the latest when dropped.
pub struct Scope<H: Handle> {
    handle: H,
    finalized: bool,
}

impl<H: Handle> Scope<H> {
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            finalized: false,
        }
    }

    pub fn handle(&mut self) -> &mut H {
        &mut self.handle
    }

    /// Finalize the handle (subsequent calls do nothing).
    pub fn finalize(&mut self) -> Result<(), Error> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.handle.finalize()
    }
}

impl<H: Handle> Drop for Scope<H> {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        warn!(name = %self.handle.name(), "finalizing on drop");
        if let Err(err) = self.finalize() {
            warn!(?err, "failed to finalize on drop");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        UNKNOWN_MESSAGE.to_string()
    }
}

/// Run the federate described by `config` against `federation`.
pub fn run<F: Federation, R: Rng>(
    federation: &F,
    config: &config::Federate,
    settings: &Settings,
    rng: R,
) -> Outcome {
    let mut stopwatch = Stopwatch::start();

    // Build the federate before joining
    let catalog = match Catalog::resolve(config, &settings.role) {
        Ok(catalog) => catalog,
        Err(err) => {
            error!(name = %config.name, ?err, "failed to resolve signals");
            return Outcome::Startup(err);
        }
    };
    let clock = match Clock::new(settings.delta_time, settings.stop_time) {
        Ok(clock) => clock,
        Err(err) => {
            error!(name = %config.name, ?err, "invalid clock");
            return Outcome::Startup(err);
        }
    };
    info!(
        name = %config.name,
        role = ?settings.role,
        subscriptions = catalog.subscriptions().len(),
        publications = catalog.publications().len(),
        steps = clock.steps(),
        "created federate"
    );
    let mut federate = Federate::new(
        config.name.clone(),
        catalog,
        settings.role,
        clock,
        rng,
        settings.timeout,
    );
    let handle = match federation.connect(config) {
        Ok(handle) => handle,
        Err(err) => {
            error!(name = %config.name, ?err, "failed to join federation");
            federation.cleanup();
            return Outcome::Startup(err);
        }
    };
    let mut scope = Scope::new(handle);

    // Initialize and execute
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        federate.transition(State::Initializing)?;
        federate.initialize(scope.handle())?;
        let initialization = stopwatch.lap();
        let summary = federate.execute(scope.handle())?;
        let execution = stopwatch.lap();
        Ok::<_, Error>((initialization, summary, execution))
    }));

    match result {
        Ok(Ok((initialization, summary, execution))) => {
            let finalized = scope
                .finalize()
                .and_then(|_| federate.transition(State::Finalized));
            federation.cleanup();
            if let Err(err) = finalized {
                federate.fail();
                error!(name = %config.name, ?err, "failed to finalize");
                return Outcome::Failed(err);
            }
            let closing = stopwatch.lap();
            info!(name = %config.name, "finalized");
            Outcome::Completed(Report {
                name: config.name.clone(),
                summary,
                timings: Timings {
                    initialization,
                    execution,
                    closing,
                },
            })
        }
        Ok(Err(err)) => {
            federate.fail();
            error!(name = %config.name, ?err, "federate failed");
            scope.handle().report_error(KNOWN_FAILURE, &err.to_string());
            if let Err(err) = scope.finalize() {
                warn!(name = %config.name, ?err, "failed to finalize");
            }
            federation.cleanup();
            Outcome::Failed(err)
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            federate.fail();
            error!(name = %config.name, reason = %message, "federate panicked");
            scope.handle().report_error(UNKNOWN_FAILURE, UNKNOWN_MESSAGE);
            if let Err(err) = scope.finalize() {
                warn!(name = %config.name, ?err, "failed to finalize");
            }
            federation.cleanup();
            Outcome::Panicked(message)
        }
    }
}
