//! Drive a federate through its lifecycle states and the time-stepped loop.
//!
//! # States
//!
//! ```txt
//! Configured -> Initializing -> Executing -> Finalized
//!                    |              |
//!                    +---> Errored <+
//! ```
//!
//! The loop runs while the current time is below the stop time. Whenever the current time is the
//! boundary most recently requested, every subscription is refreshed and then every publication is
//! emitted (both in resolved order) before the next boundary is requested. If the final grant lands
//! on the stop time, one last boundary is processed there without requesting further time.

use crate::{catalog::Catalog, clock::Clock, role::Role, Deadline, Error, Handle};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};

/// Lifecycle state of a federate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Configured,
    Initializing,
    Executing,
    Finalized,
    Errored,
}

impl State {
    /// Returns true if a federate in this state may move to `to`.
    pub fn allows(self, to: State) -> bool {
        matches!(
            (self, to),
            (State::Configured, State::Initializing)
                | (State::Initializing, State::Executing)
                | (State::Executing, State::Finalized)
                | (State::Initializing, State::Errored)
                | (State::Executing, State::Errored)
        )
    }
}

/// Counters collected while executing.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Summary {
    /// Boundaries at which subscriptions were refreshed and publications emitted.
    pub boundaries: usize,
    /// Time advance requests made to the federation.
    pub requests: usize,
    /// Time of the final grant.
    pub final_time: f64,
}

/// A federate participating in a federation.
pub struct Federate<R: Rng> {
    name: String,
    catalog: Catalog,
    role: Role,
    clock: Clock,
    rng: R,
    timeout: Option<Duration>,
    state: State,
    summary: Summary,
}

impl<R: Rng> Federate<R> {
    /// Create a federate in the [State::Configured] state.
    ///
    /// `timeout` bounds every blocking call to the federation (`None` waits forever).
    pub fn new(
        name: String,
        catalog: Catalog,
        role: Role,
        clock: Clock,
        rng: R,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            name,
            catalog,
            role,
            clock,
            rng,
            timeout,
            state: State::Configured,
            summary: Summary::default(),
        }
    }

    /// Name the federate joined with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Signals of the federate and their cached values.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Simulation time of the federate.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Move to state `to`.
    pub fn transition(&mut self, to: State) -> Result<(), Error> {
        if !self.state.allows(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(name = %self.name, from = ?self.state, ?to, "transitioning");
        self.state = to;
        Ok(())
    }

    /// Mark the federate as failed.
    ///
    /// Unlike [Federate::transition], this never fails: a failure may surface from any state.
    pub fn fail(&mut self) {
        debug!(name = %self.name, from = ?self.state, "failed");
        self.state = State::Errored;
    }

    fn deadline(&self) -> Deadline {
        Deadline::within(self.timeout)
    }

    /// Enter initializing mode and then executing mode.
    pub fn initialize<H: Handle>(&mut self, handle: &mut H) -> Result<(), Error> {
        if self.state != State::Initializing {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: State::Executing,
            });
        }
        info!(name = %self.name, "entering initializing mode");
        handle.enter_initializing_mode(self.deadline())?;
        handle.enter_executing_mode(self.deadline())?;
        self.transition(State::Executing)?;
        info!(name = %self.name, "entered executing mode");
        Ok(())
    }

    /// Run the time-stepped loop until the stop time is reached.
    pub fn execute<H: Handle>(&mut self, handle: &mut H) -> Result<Summary, Error> {
        if self.state != State::Executing {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: State::Executing,
            });
        }
        while !self.clock.finished() {
            info!(time = self.clock.current(), "current time");
            if self.clock.at_boundary() {
                self.boundary(handle)?;
                self.clock.schedule();
            }

            // Wait for the federation to grant the next boundary
            let requested = self.clock.next();
            let granted = handle.request_time(requested, self.deadline())?;
            self.summary.requests += 1;
            self.clock.grant(granted)?;
            if self.clock.overshot() {
                debug!(requested, granted, "granted time past boundary");
                self.clock.schedule();
            }
        }
        if self.clock.at_boundary() {
            self.boundary(handle)?;
        }
        self.summary.final_time = self.clock.current();
        info!(
            name = %self.name,
            boundaries = self.summary.boundaries,
            requests = self.summary.requests,
            time = self.summary.final_time,
            "reached stop time"
        );
        Ok(self.summary)
    }

    /// Refresh every subscription, then emit every publication.
    fn boundary<H: Handle>(&mut self, handle: &mut H) -> Result<(), Error> {
        self.catalog.begin_step();
        debug!(time = self.clock.current(), "updating subscriptions");
        self.catalog.refresh_all(handle)?;

        debug!(time = self.clock.current(), "updating publications");
        for index in 0..self.catalog.publications().len() {
            let key = self.catalog.publications()[index].key();
            let payload = self.role.payload(key, &self.catalog, &mut self.rng);
            self.catalog.publish_at(handle, index, payload)?;
        }
        self.summary.boundaries += 1;
        Ok(())
    }
}
