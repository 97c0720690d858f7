//! Implementation of a simulated federation.

use crate::{config, lifecycle, Deadline, Error};
use std::{
    collections::BTreeMap,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, trace, warn};

/// Configuration for the simulated federation.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Number of federates that must join before any collective call completes.
    pub federates: usize,

    /// Retain every published value (see [Federation::published]).
    pub record: bool,
}

/// A value published to the simulated federation.
#[derive(Clone, Debug, PartialEq)]
pub struct Published {
    pub federate: String,
    pub key: String,
    pub time: f64,
    pub value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Mode {
    Joined,
    Initializing,
    Executing,
    Finalized,
}

struct Input {
    required: bool,
    value: String,
    updated: bool,
    seen: u64,
}

struct Member {
    name: String,
    mode: Mode,
    granted: f64,
    requested: Option<f64>,
    inputs: BTreeMap<String, Input>,
}

struct Entry {
    sequence: u64,
    time: f64,
    value: String,
}

struct Publication {
    owner: usize,
    history: Vec<Entry>,
}

struct Failure {
    /// Unset when the federate failed before it could join.
    member: Option<usize>,
    federate: String,
    code: i32,
    message: String,
}

#[derive(Default)]
struct State {
    members: Vec<Member>,
    publications: BTreeMap<String, Publication>,
    sequence: u64,
    failure: Option<Failure>,
    closed: bool,
    published: Vec<Published>,
}

impl State {
    /// Grant the smallest pending request to every member that asked for it, once every active
    /// member is waiting on a request.
    fn grant(&mut self) {
        let mut earliest: Option<f64> = None;
        for member in self.members.iter().filter(|m| m.mode != Mode::Finalized) {
            let Some(requested) = member.requested else {
                return;
            };
            earliest = Some(earliest.map_or(requested, |e: f64| e.min(requested)));
        }
        let Some(time) = earliest else {
            return;
        };
        for index in 0..self.members.len() {
            let member = &self.members[index];
            if member.mode == Mode::Finalized || member.requested != Some(time) {
                continue;
            }
            self.deliver(index, time);
            let member = &mut self.members[index];
            member.granted = time;
            member.requested = None;
            trace!(name = %member.name, time, "granted");
        }
        self.prune();
    }

    /// Deliver to `index` the latest value of each subscribed publication sent before `time`.
    fn deliver(&mut self, index: usize, time: f64) {
        let publications = &self.publications;
        for (key, input) in self.members[index].inputs.iter_mut() {
            let Some(publication) = publications.get(key) else {
                continue;
            };
            let Some(entry) = publication.history.iter().rev().find(|e| e.time < time) else {
                continue;
            };
            if entry.sequence <= input.seen {
                continue;
            }
            input.value = entry.value.clone();
            input.updated = true;
            input.seen = entry.sequence;
        }
    }

    /// Drop values that no future grant can deliver.
    fn prune(&mut self) {
        let Some(floor) = self
            .members
            .iter()
            .filter(|m| m.mode != Mode::Finalized)
            .map(|m| m.granted)
            .reduce(f64::min)
        else {
            return;
        };
        for publication in self.publications.values_mut() {
            if let Some(last) = publication.history.iter().rposition(|e| e.time < floor) {
                publication.history.drain(..last);
            }
        }
    }
}

struct Shared {
    cfg: Config,
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `ready` returns a value, a peer fails, or `deadline` expires.
    fn wait<T>(
        &self,
        member: usize,
        deadline: Deadline,
        waiting: &'static str,
        mut ready: impl FnMut(&mut State) -> Option<T>,
    ) -> Result<T, Error> {
        let mut state = self.lock();
        loop {
            if let Some(failure) = state.failure.as_ref().filter(|f| f.member != Some(member)) {
                return Err(Error::PeerFailed {
                    federate: failure.federate.clone(),
                    code: failure.code,
                    message: failure.message.clone(),
                });
            }
            if let Some(value) = ready(&mut *state) {
                return Ok(value);
            }
            state = match deadline.remaining() {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(left) if left.is_zero() => return Err(Error::Timeout(waiting)),
                Some(left) => {
                    self.changed
                        .wait_timeout(state, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Move `member` to `mode` and wait until every expected federate has reached it.
    /// Record the first failure and release every waiter.
    fn fail(&self, state: &mut State, failure: Failure) {
        if state.failure.is_none() {
            state.failure = Some(failure);
        }
        self.changed.notify_all();
    }

    fn barrier(&self, member: usize, mode: Mode, deadline: Deadline) -> Result<(), Error> {
        {
            let mut state = self.lock();
            let current = &mut state.members[member];
            if current.mode == Mode::Finalized {
                return Err(Error::AlreadyFinalized);
            }
            current.mode = current.mode.max(mode);
            self.changed.notify_all();
        }
        let expected = self.cfg.federates;
        self.wait(member, deadline, "federates", |state| {
            (state.members.len() == expected && state.members.iter().all(|m| m.mode >= mode))
                .then_some(())
        })
    }
}

/// A federation of in-process federates, each driven from its own thread.
///
/// Time is granted conservatively: once every active federate is waiting on a time request, the
/// smallest requested time is granted to every federate that asked for it. A value published at
/// time `t` is delivered with the first grant strictly after `t`.
#[derive(Clone)]
pub struct Federation {
    shared: Arc<Shared>,
}

impl Federation {
    pub fn new(cfg: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                cfg,
                state: Mutex::new(State::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Returns true once every federate has finalized and [crate::Federation::cleanup] was called.
    pub fn closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Values published so far (empty unless [Config::record] is set).
    pub fn published(&self) -> Vec<Published> {
        self.shared.lock().published.clone()
    }
}

impl crate::Federation for Federation {
    type Handle = Handle;

    fn connect(&self, config: &config::Federate) -> Result<Handle, Error> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(Error::FederationClosed);
        }
        let keys: Vec<String> = config
            .publications
            .iter()
            .map(|publication| config.qualify(&publication.key))
            .collect();
        let rejected = if state.members.len() >= self.shared.cfg.federates {
            Some(Error::FederationFull(self.shared.cfg.federates))
        } else if state.members.iter().any(|m| m.name == config.name) {
            Some(Error::DuplicateFederate(config.name.clone()))
        } else {
            keys.iter()
                .find(|key| state.publications.contains_key(*key))
                .map(|key| Error::DuplicatePublication(key.clone()))
        };
        if let Some(err) = rejected {
            // The expected count can no longer be reached, so peers must not wait for it
            warn!(name = %config.name, error = ?err, "federate rejected");
            self.shared.fail(
                &mut state,
                Failure {
                    member: None,
                    federate: config.name.clone(),
                    code: lifecycle::STARTUP_FAILURE,
                    message: err.to_string(),
                },
            );
            return Err(err);
        }

        // Register the federate and its declared publications
        let index = state.members.len();
        for key in keys {
            state.publications.insert(
                key,
                Publication {
                    owner: index,
                    history: Vec::new(),
                },
            );
        }
        let inputs = config
            .subscriptions
            .iter()
            .map(|subscription| {
                (
                    subscription.key.clone(),
                    Input {
                        required: subscription.required,
                        value: String::new(),
                        updated: false,
                        seen: 0,
                    },
                )
            })
            .collect();
        state.members.push(Member {
            name: config.name.clone(),
            mode: Mode::Joined,
            granted: 0.0,
            requested: None,
            inputs,
        });
        debug!(name = %config.name, index, "federate joined");
        self.shared.changed.notify_all();
        Ok(Handle {
            shared: self.shared.clone(),
            config: config.clone(),
            index,
        })
    }

    fn cleanup(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        if state.members.len() == self.shared.cfg.federates
            && state.members.iter().all(|m| m.mode == Mode::Finalized)
        {
            state.closed = true;
            debug!("federation closed");
        }
    }
}

/// A federate's connection to the simulated [Federation].
pub struct Handle {
    shared: Arc<Shared>,
    config: config::Federate,
    index: usize,
}

impl Handle {
    fn active(&self, state: &State) -> Result<(), Error> {
        if state.members[self.index].mode == Mode::Finalized {
            return Err(Error::AlreadyFinalized);
        }
        Ok(())
    }
}

impl crate::Handle for Handle {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn enter_initializing_mode(&mut self, deadline: Deadline) -> Result<(), Error> {
        self.shared
            .barrier(self.index, Mode::Initializing, deadline)?;

        // Every federate has joined, so every declared publication is known
        let state = self.shared.lock();
        for (key, input) in state.members[self.index].inputs.iter() {
            if input.required && !state.publications.contains_key(key) {
                return Err(Error::MissingPublisher(key.clone()));
            }
        }
        Ok(())
    }

    fn enter_executing_mode(&mut self, deadline: Deadline) -> Result<(), Error> {
        self.shared.barrier(self.index, Mode::Executing, deadline)
    }

    fn request_time(&mut self, time: f64, deadline: Deadline) -> Result<f64, Error> {
        {
            let mut state = self.shared.lock();
            self.active(&state)?;
            let member = &mut state.members[self.index];
            if time <= member.granted {
                return Ok(member.granted);
            }
            member.requested = Some(time);
            state.grant();
            self.shared.changed.notify_all();
        }
        let index = self.index;
        let result = self.shared.wait(index, deadline, "time grant", |state| {
            let member = &state.members[index];
            member.requested.is_none().then_some(member.granted)
        });
        if result.is_err() {
            // Withdraw the request so peers are not granted against it
            let mut state = self.shared.lock();
            state.members[index].requested = None;
        }
        result
    }

    fn is_updated(&self, key: &str) -> Result<bool, Error> {
        let state = self.shared.lock();
        state.members[self.index]
            .inputs
            .get(key)
            .map(|input| input.updated)
            .ok_or_else(|| Error::UnknownSubscription(key.to_string()))
    }

    fn get_value(&mut self, key: &str) -> Result<String, Error> {
        let mut state = self.shared.lock();
        let input = state.members[self.index]
            .inputs
            .get_mut(key)
            .ok_or_else(|| Error::UnknownSubscription(key.to_string()))?;
        input.updated = false;
        Ok(input.value.clone())
    }

    fn publish(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let qualified = self.config.qualify(key);
        let mut state = self.shared.lock();
        self.active(&state)?;
        let time = state.members[self.index].granted;
        state.sequence += 1;
        let sequence = state.sequence;
        let publication = state
            .publications
            .entry(qualified.clone())
            .or_insert_with(|| Publication {
                owner: self.index,
                history: Vec::new(),
            });
        if publication.owner != self.index {
            return Err(Error::DuplicatePublication(qualified));
        }
        publication.history.push(Entry {
            sequence,
            time,
            value: value.to_string(),
        });
        if self.shared.cfg.record {
            state.published.push(Published {
                federate: self.config.name.clone(),
                key: qualified,
                time,
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn report_error(&mut self, code: i32, message: &str) {
        let mut state = self.shared.lock();
        warn!(name = %self.config.name, code, reason = %message, "federate reported error");
        self.shared.fail(
            &mut state,
            Failure {
                member: Some(self.index),
                federate: self.config.name.clone(),
                code,
                message: message.to_string(),
            },
        );
    }

    fn finalize(&mut self) -> Result<(), Error> {
        let mut state = self.shared.lock();
        self.active(&state)?;
        let member = &mut state.members[self.index];
        member.mode = Mode::Finalized;
        member.requested = None;
        debug!(name = %self.config.name, time = member.granted, "federate finalized");

        // Peers may have been waiting on this federate to request time
        state.grant();
        self.shared.changed.notify_all();
        Ok(())
    }
}
