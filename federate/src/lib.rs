//! Exchange signals with peer federates under a shared, time-stepped simulation clock.
//!
//! A federate is one participant in a co-simulation federation. It owns a set of named
//! publications and subscriptions, advances simulated time in fixed increments, and at every step
//! boundary refreshes its subscriptions before emitting its publications. Time advancement and value
//! delivery are negotiated by a federation runtime, consumed here through the [Federation] and
//! [Handle] traits.
//!
//! # Components
//!
//! * [catalog]: resolves signal keys from configuration and caches the latest value of each signal.
//! * [role]: decides what each publication emits on a step (synthetic payloads or relayed values).
//! * [clock]: tracks requested and granted simulation time.
//! * [execution]: drives the federate through its lifecycle states and the per-step loop.
//! * [lifecycle]: the fault boundary that classifies failures, reports them to the federation, and
//!   guarantees the handle is finalized.
//!
//! Two runtimes are provided in-process: [simulated] (federates on threads with conservative time
//! grants) and [mocks] (a scripted single-federate runtime for tests).
//!
//! # Status
//!
//! `cosim-federate` is **ALPHA** software. The bundled runtimes exist to exercise the federate loop
//! and are not a substitute for a production co-simulation kernel.

use std::time::{Duration, Instant};
use thiserror::Error;

pub mod arguments;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod execution;
pub mod lifecycle;
pub mod logging;
pub mod mocks;
pub mod role;
pub mod simulated;
pub mod timing;

/// Errors that can occur while running a federate.
///
/// Every variant is a recognized failure: when one reaches the [lifecycle] boundary it is reported
/// to the federation with [lifecycle::KNOWN_FAILURE].
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid yaml configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("empty signal key")]
    EmptyKey,
    #[error("duplicate {direction} key: {key}")]
    DuplicateKey {
        direction: catalog::Direction,
        key: String,
    },
    #[error("invalid step delta (must be finite and > 0): {0}")]
    InvalidStepDelta(f64),
    #[error("invalid stop time (must be finite and > 0): {0}")]
    InvalidStopTime(f64),
    #[error("granted time {granted} precedes current time {current}")]
    TimeRegression { current: f64, granted: f64 },
    #[error("timeout waiting for {0}")]
    Timeout(&'static str),
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: execution::State,
        to: execution::State,
    },
    #[error("unknown publication: {0}")]
    UnknownPublication(String),
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),
    #[error("required subscription has no publisher: {0}")]
    MissingPublisher(String),
    #[error("duplicate federate: {0}")]
    DuplicateFederate(String),
    #[error("duplicate publication: {0}")]
    DuplicatePublication(String),
    #[error("federation full (expected {0} federates)")]
    FederationFull(usize),
    #[error("federation closed")]
    FederationClosed,
    #[error("federate already finalized")]
    AlreadyFinalized,
    #[error("federate {federate} failed with code {code}: {message}")]
    PeerFailed {
        federate: String,
        code: i32,
        message: String,
    },
}

/// Point in wall-clock time after which a blocking runtime call gives up with [Error::Timeout].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires.
    pub const fn never() -> Self {
        Self(None)
    }

    /// A deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self(Some(Instant::now() + duration))
    }

    /// A deadline `duration` from now, or one that never expires.
    pub fn within(duration: Option<Duration>) -> Self {
        duration.map_or_else(Self::never, Self::after)
    }

    /// Time left before expiry (`None` if the deadline never expires).
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Returns true if the deadline has passed.
    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

/// Connection point to a federation runtime.
pub trait Federation {
    /// The per-federate handle returned by [Federation::connect].
    type Handle: Handle;

    /// Register a federate described by `config` with the federation.
    fn connect(&self, config: &config::Federate) -> Result<Self::Handle, Error>;

    /// Release runtime-global resources.
    ///
    /// Called once after the last handle in the process is finalized.
    fn cleanup(&self);
}

/// A federate's connection to the federation runtime.
///
/// Blocking calls take a [Deadline] and fail with [Error::Timeout] once it expires.
pub trait Handle {
    /// Name of the federate, as registered with the federation.
    fn name(&self) -> &str;

    /// Enter initializing mode (collective: waits on every peer).
    fn enter_initializing_mode(&mut self, deadline: Deadline) -> Result<(), Error>;

    /// Enter executing mode (collective: waits on every peer).
    fn enter_executing_mode(&mut self, deadline: Deadline) -> Result<(), Error>;

    /// Request a time advance to `time`, returning the time granted by the federation.
    ///
    /// The granted time may exceed `time`.
    fn request_time(&mut self, time: f64, deadline: Deadline) -> Result<f64, Error>;

    /// Returns true if a new value was delivered for the subscription `key` and not yet read.
    fn is_updated(&self, key: &str) -> Result<bool, Error>;

    /// Read the latest value delivered for the subscription `key`.
    fn get_value(&mut self, key: &str) -> Result<String, Error>;

    /// Publish `value` under the publication `key`.
    fn publish(&mut self, key: &str, value: &str) -> Result<(), Error>;

    /// Report a failure to the federation so peers can observe it.
    fn report_error(&mut self, code: i32, message: &str);

    /// Leave the federation.
    fn finalize(&mut self) -> Result<(), Error>;
}

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
