//! A scripted federation for exercising a single federate without peers.
//!
//! Values "delivered" by peers, the times granted in response to requests, and injected faults are
//! all fixed up front in a [Script]. Every call made by the federate is captured in a [Record].

use crate::{config, Deadline, Error};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// A value that becomes visible on a subscription once the granted time reaches `time`.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub time: f64,
    pub key: String,
    pub value: String,
}

impl Delivery {
    pub fn new(time: f64, key: &str, value: &str) -> Self {
        Self {
            time,
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// A failure injected into the federation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail connecting.
    Connect,
    /// Fail entering initializing mode.
    EnterInitializing,
    /// Fail the publish following `after` successful ones.
    Publish { after: usize },
    /// Panic on the time request following `after` successful ones.
    Panic { after: usize },
    /// Block the time request following `after` successful ones until its deadline expires.
    Stall { after: usize },
    /// Fail finalizing.
    Finalize,
}

/// Behavior of a mock federation.
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// Times granted for successive requests (requests beyond the list are granted as asked).
    pub grants: Vec<f64>,
    /// Values delivered to subscriptions, in time order.
    pub deliveries: Vec<Delivery>,
    pub fault: Option<Fault>,
}

/// Calls observed by a mock federation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub connects: usize,
    pub initializing: usize,
    pub executing: usize,
    pub requests: Vec<f64>,
    /// `(time, key, value)` for every successful publish.
    pub published: Vec<(f64, String, String)>,
    /// `(key, value)` for every value read.
    pub reads: Vec<(String, String)>,
    pub errors: Vec<(i32, String)>,
    pub finalized: usize,
    pub cleanups: usize,
}

/// Mock implementation of [crate::Federation].
#[derive(Clone)]
pub struct Federation {
    script: Script,
    record: Arc<Mutex<Record>>,
}

impl Federation {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            record: Arc::new(Mutex::new(Record::default())),
        }
    }

    /// Returns a snapshot of the calls observed so far.
    pub fn record(&self) -> Record {
        self.record.lock().unwrap().clone()
    }
}

impl crate::Federation for Federation {
    type Handle = Handle;

    fn connect(&self, config: &config::Federate) -> Result<Handle, Error> {
        self.record.lock().unwrap().connects += 1;
        if self.script.fault == Some(Fault::Connect) {
            return Err(Error::FederationClosed);
        }
        let inbox = config
            .subscriptions
            .iter()
            .map(|subscription| (subscription.key.clone(), Inbox::default()))
            .collect();
        Ok(Handle {
            name: config.name.clone(),
            script: self.script.clone(),
            record: self.record.clone(),
            time: 0.0,
            grants: 0,
            delivered: 0,
            inbox,
        })
    }

    fn cleanup(&self) {
        self.record.lock().unwrap().cleanups += 1;
    }
}

#[derive(Default)]
struct Inbox {
    value: String,
    updated: bool,
}

/// Handle returned by the mock [Federation].
pub struct Handle {
    name: String,
    script: Script,
    record: Arc<Mutex<Record>>,
    time: f64,
    grants: usize,
    delivered: usize,
    inbox: BTreeMap<String, Inbox>,
}

impl Handle {
    fn deliver(&mut self) {
        for (index, delivery) in self.script.deliveries.iter().enumerate() {
            if index < self.delivered || delivery.time > self.time {
                continue;
            }
            if let Some(inbox) = self.inbox.get_mut(&delivery.key) {
                inbox.value = delivery.value.clone();
                inbox.updated = true;
            }
            self.delivered = index + 1;
        }
    }
}

impl crate::Handle for Handle {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter_initializing_mode(&mut self, _: Deadline) -> Result<(), Error> {
        self.record.lock().unwrap().initializing += 1;
        if self.script.fault == Some(Fault::EnterInitializing) {
            return Err(Error::MissingPublisher("injected".into()));
        }
        Ok(())
    }

    fn enter_executing_mode(&mut self, _: Deadline) -> Result<(), Error> {
        self.record.lock().unwrap().executing += 1;
        Ok(())
    }

    fn request_time(&mut self, time: f64, deadline: Deadline) -> Result<f64, Error> {
        let previous = {
            let mut record = self.record.lock().unwrap();
            record.requests.push(time);
            record.requests.len() - 1
        };
        match self.script.fault {
            Some(Fault::Panic { after }) if previous == after => {
                panic!("injected panic at request {previous}");
            }
            Some(Fault::Stall { after }) if previous == after => {
                let Some(left) = deadline.remaining() else {
                    panic!("stalled request without a deadline");
                };
                std::thread::sleep(left);
                return Err(Error::Timeout("time grant"));
            }
            _ => {}
        }
        let granted = self.script.grants.get(self.grants).copied().unwrap_or(time);
        self.grants += 1;
        self.time = granted;
        self.deliver();
        Ok(granted)
    }

    fn is_updated(&self, key: &str) -> Result<bool, Error> {
        self.inbox
            .get(key)
            .map(|inbox| inbox.updated)
            .ok_or_else(|| Error::UnknownSubscription(key.to_string()))
    }

    fn get_value(&mut self, key: &str) -> Result<String, Error> {
        let inbox = self
            .inbox
            .get_mut(key)
            .ok_or_else(|| Error::UnknownSubscription(key.to_string()))?;
        inbox.updated = false;
        self.record
            .lock()
            .unwrap()
            .reads
            .push((key.to_string(), inbox.value.clone()));
        Ok(inbox.value.clone())
    }

    fn publish(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let mut record = self.record.lock().unwrap();
        if let Some(Fault::Publish { after }) = self.script.fault {
            if record.published.len() == after {
                return Err(Error::UnknownPublication(key.to_string()));
            }
        }
        record
            .published
            .push((self.time, key.to_string(), value.to_string()));
        Ok(())
    }

    fn report_error(&mut self, code: i32, message: &str) {
        self.record
            .lock()
            .unwrap()
            .errors
            .push((code, message.to_string()));
    }

    fn finalize(&mut self) -> Result<(), Error> {
        self.record.lock().unwrap().finalized += 1;
        if self.script.fault == Some(Fault::Finalize) {
            return Err(Error::AlreadyFinalized);
        }
        Ok(())
    }
}
