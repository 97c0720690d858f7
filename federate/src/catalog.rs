//! Resolve a federate's signals and track the latest value of each.
//!
//! Subscription keys are read from configuration and sorted lexically. Publication keys depend on
//! the federate's [Role]: a producer publishes the keys listed in its configuration, while a relay
//! derives one publication per distinct subscription prefix (the part of the key before
//! [SEPARATOR]).

use crate::{config, role::Role, Error, Handle};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use tracing::trace;

/// Separator between a signal name and the federate it originates from (`<name>::<federate>`).
pub const SEPARATOR: &str = "::";

/// Direction of a signal relative to this federate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Publication,
    Subscription,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Publication => write!(f, "publication"),
            Direction::Subscription => write!(f, "subscription"),
        }
    }
}

/// A named endpoint and the last value seen on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    key: String,
    direction: Direction,
    last_value: String,
    updated: bool,
}

impl Signal {
    fn new(key: String, direction: Direction) -> Self {
        Self {
            key,
            direction,
            last_value: String::new(),
            updated: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Last value received (subscriptions) or sent (publications), empty until the first.
    pub fn last_value(&self) -> &str {
        &self.last_value
    }

    /// Returns true if a new value was delivered during the current step.
    pub fn updated(&self) -> bool {
        self.updated
    }
}

/// Strip the `::<federate>` suffix from `key`.
///
/// ```
/// use federate::catalog::truncate;
///
/// assert_eq!(truncate("temp::fedA"), "temp");
/// assert_eq!(truncate("temp"), "temp");
/// ```
pub fn truncate(key: &str) -> &str {
    key.find(SEPARATOR).map_or(key, |at| &key[..at])
}

/// Sort `keys`, rejecting empty keys and duplicates.
fn sorted(direction: Direction, keys: Vec<String>) -> Result<Vec<String>, Error> {
    let mut seen = BTreeSet::new();
    for key in keys {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if seen.contains(&key) {
            return Err(Error::DuplicateKey { direction, key });
        }
        seen.insert(key);
    }
    Ok(seen.into_iter().collect())
}

/// Resolve the subscription keys of `config` in lexical order.
pub fn resolve_subscriptions(config: &config::Federate) -> Result<Vec<String>, Error> {
    let keys = config
        .subscriptions
        .iter()
        .map(|subscription| subscription.key.clone())
        .collect();
    sorted(Direction::Subscription, keys)
}

/// Resolve the publication keys of `config` for `role`.
///
/// `subscriptions` must be the output of [resolve_subscriptions].
pub fn resolve_publications(
    config: &config::Federate,
    role: &Role,
    subscriptions: &[String],
) -> Result<Vec<String>, Error> {
    match role {
        Role::Producer { .. } => {
            let keys = config
                .publications
                .iter()
                .map(|publication| publication.key.clone())
                .collect();
            sorted(Direction::Publication, keys)
        }
        Role::Relay => {
            let mut seen = BTreeSet::new();
            let mut keys = Vec::new();
            for subscription in subscriptions {
                let key = truncate(subscription);
                if key.is_empty() {
                    return Err(Error::EmptyKey);
                }
                if seen.insert(key) {
                    keys.push(key.to_string());
                }
            }
            Ok(keys)
        }
    }
}

/// Signals owned by a federate, in resolved order.
#[derive(Clone, Debug)]
pub struct Catalog {
    subscriptions: Vec<Signal>,
    publications: Vec<Signal>,
    subscription_index: BTreeMap<String, usize>,
    publication_index: BTreeMap<String, usize>,
}

impl Catalog {
    /// Resolve the signals of `config` for `role`.
    pub fn resolve(config: &config::Federate, role: &Role) -> Result<Self, Error> {
        let subscriptions = resolve_subscriptions(config)?;
        let publications = resolve_publications(config, role, &subscriptions)?;
        Ok(Self::new(subscriptions, publications))
    }

    /// Create a catalog from already-resolved keys.
    pub fn new(subscriptions: Vec<String>, publications: Vec<String>) -> Self {
        let subscription_index = subscriptions
            .iter()
            .enumerate()
            .map(|(index, key)| (key.clone(), index))
            .collect();
        let publication_index = publications
            .iter()
            .enumerate()
            .map(|(index, key)| (key.clone(), index))
            .collect();
        Self {
            subscriptions: subscriptions
                .into_iter()
                .map(|key| Signal::new(key, Direction::Subscription))
                .collect(),
            publications: publications
                .into_iter()
                .map(|key| Signal::new(key, Direction::Publication))
                .collect(),
            subscription_index,
            publication_index,
        }
    }

    pub fn subscriptions(&self) -> &[Signal] {
        &self.subscriptions
    }

    pub fn publications(&self) -> &[Signal] {
        &self.publications
    }

    pub fn subscription(&self, key: &str) -> Option<&Signal> {
        self.subscription_index
            .get(key)
            .map(|index| &self.subscriptions[*index])
    }

    pub fn publication(&self, key: &str) -> Option<&Signal> {
        self.publication_index
            .get(key)
            .map(|index| &self.publications[*index])
    }

    /// First subscription (in resolved order) whose truncated key is `publication`.
    pub fn source(&self, publication: &str) -> Option<&Signal> {
        self.subscriptions
            .iter()
            .find(|signal| truncate(&signal.key) == publication)
    }

    /// Clear the per-step update flag of every subscription.
    pub fn begin_step(&mut self) {
        for signal in self.subscriptions.iter_mut() {
            signal.updated = false;
        }
    }

    /// Fetch the subscription `key` if the federation delivered a new value for it.
    ///
    /// Returns the cached value when nothing new was delivered.
    pub fn refresh<H: Handle>(&mut self, handle: &mut H, key: &str) -> Result<&str, Error> {
        let index = *self
            .subscription_index
            .get(key)
            .ok_or_else(|| Error::UnknownSubscription(key.to_string()))?;
        self.refresh_at(handle, index)
    }

    /// Refresh every subscription in resolved order.
    pub fn refresh_all<H: Handle>(&mut self, handle: &mut H) -> Result<(), Error> {
        for index in 0..self.subscriptions.len() {
            self.refresh_at(handle, index)?;
        }
        Ok(())
    }

    fn refresh_at<H: Handle>(&mut self, handle: &mut H, index: usize) -> Result<&str, Error> {
        let signal = &mut self.subscriptions[index];
        if handle.is_updated(&signal.key)? {
            signal.last_value = handle.get_value(&signal.key)?;
            signal.updated = true;
        }
        trace!(
            key = %signal.key,
            value = %signal.last_value,
            updated = signal.updated,
            "refreshed subscription"
        );
        Ok(&signal.last_value)
    }

    /// Send `value` under the publication `key`.
    pub fn publish<H: Handle>(
        &mut self,
        handle: &mut H,
        key: &str,
        value: String,
    ) -> Result<(), Error> {
        let index = *self
            .publication_index
            .get(key)
            .ok_or_else(|| Error::UnknownPublication(key.to_string()))?;
        self.publish_at(handle, index, value)
    }

    pub(crate) fn publish_at<H: Handle>(
        &mut self,
        handle: &mut H,
        index: usize,
        value: String,
    ) -> Result<(), Error> {
        let signal = &mut self.publications[index];
        handle.publish(&signal.key, &value)?;
        trace!(key = %signal.key, value = %value, "published");
        signal.last_value = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Federate, Publication, Subscription},
        mocks::{self, Delivery},
        Deadline, Federation as _,
    };
    use commonware_macros::test_traced;

    fn federate(publications: &[&str], subscriptions: &[&str]) -> Federate {
        Federate {
            name: "fed".into(),
            publications: publications
                .iter()
                .map(|key| Publication {
                    key: key.to_string(),
                    kind: "string".into(),
                    unit: None,
                    global: false,
                })
                .collect(),
            subscriptions: subscriptions
                .iter()
                .map(|key| Subscription {
                    key: key.to_string(),
                    kind: "string".into(),
                    unit: None,
                    required: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("A::B"), "A");
        assert_eq!(truncate("A::B::C"), "A");
        assert_eq!(truncate("A:B"), "A:B");
        assert_eq!(truncate("::B"), "");
    }

    #[test]
    fn test_subscriptions_sorted() {
        let config = federate(&[], &["volt", "amp", "temp"]);
        assert_eq!(
            resolve_subscriptions(&config).unwrap(),
            vec!["amp", "temp", "volt"]
        );
    }

    #[test]
    fn test_producer_publications() {
        let config = federate(&["m1", "m0"], &["in"]);
        let role = Role::Producer { message_size: 4 };
        let subscriptions = resolve_subscriptions(&config).unwrap();
        assert_eq!(
            resolve_publications(&config, &role, &subscriptions).unwrap(),
            vec!["m0", "m1"]
        );
    }

    #[test]
    fn test_relay_publications() {
        let config = federate(&["ignored"], &["temp::fedA", "volt::fedA", "temp::fedB"]);
        let subscriptions = resolve_subscriptions(&config).unwrap();
        assert_eq!(
            subscriptions,
            vec!["temp::fedA", "temp::fedB", "volt::fedA"]
        );
        assert_eq!(
            resolve_publications(&config, &Role::Relay, &subscriptions).unwrap(),
            vec!["temp", "volt"]
        );
    }

    #[test]
    fn test_relay_preserves_first_seen_order() {
        let subscriptions = vec!["b::x".to_string(), "a::y".to_string(), "b::z".to_string()];
        let config = federate(&[], &[]);
        assert_eq!(
            resolve_publications(&config, &Role::Relay, &subscriptions).unwrap(),
            vec!["b", "a"]
        );
    }

    #[test]
    fn test_malformed_keys() {
        let config = federate(&[], &["a", "a"]);
        assert!(matches!(
            Catalog::resolve(&config, &Role::Relay),
            Err(Error::DuplicateKey {
                direction: Direction::Subscription,
                ..
            })
        ));

        let config = federate(&["x", "x"], &[]);
        assert!(matches!(
            Catalog::resolve(&config, &Role::Producer { message_size: 1 }),
            Err(Error::DuplicateKey {
                direction: Direction::Publication,
                ..
            })
        ));

        let config = federate(&[], &[""]);
        assert!(matches!(
            Catalog::resolve(&config, &Role::Relay),
            Err(Error::EmptyKey)
        ));

        let config = federate(&[], &["::fedA"]);
        assert!(matches!(
            Catalog::resolve(&config, &Role::Relay),
            Err(Error::EmptyKey)
        ));
    }

    #[test]
    fn test_shared_name_across_directions() {
        let config = federate(&["x"], &["x"]);
        let catalog = Catalog::resolve(&config, &Role::Producer { message_size: 1 }).unwrap();
        assert_eq!(catalog.publication("x").unwrap().direction(), Direction::Publication);
        assert_eq!(catalog.subscription("x").unwrap().direction(), Direction::Subscription);
    }

    #[test]
    fn test_source() {
        let catalog = Catalog::new(
            vec!["temp::fedA".into(), "temp::fedB".into(), "volt::fedA".into()],
            vec!["temp".into(), "volt".into()],
        );
        assert_eq!(catalog.source("temp").unwrap().key(), "temp::fedA");
        assert_eq!(catalog.source("volt").unwrap().key(), "volt::fedA");
        assert!(catalog.source("amp").is_none());
    }

    #[test_traced]
    fn test_refresh_idempotent() {
        let config = federate(&[], &["in"]);
        let federation = mocks::Federation::new(mocks::Script {
            deliveries: vec![Delivery::new(1.0, "in", "hello")],
            ..Default::default()
        });
        let mut handle = federation.connect(&config).unwrap();
        let mut catalog = Catalog::resolve(&config, &Role::Relay).unwrap();

        // Nothing delivered yet
        catalog.begin_step();
        assert_eq!(catalog.refresh(&mut handle, "in").unwrap(), "");
        assert!(!catalog.subscription("in").unwrap().updated());

        // Deliver a value
        handle.request_time(1.0, Deadline::never()).unwrap();
        catalog.begin_step();
        assert_eq!(catalog.refresh(&mut handle, "in").unwrap(), "hello");
        assert!(catalog.subscription("in").unwrap().updated());

        // Refreshing again returns the cached value
        assert_eq!(catalog.refresh(&mut handle, "in").unwrap(), "hello");
        assert!(catalog.subscription("in").unwrap().updated());
        assert_eq!(federation.record().reads.len(), 1);

        // Next step keeps the value but clears the flag
        handle.request_time(2.0, Deadline::never()).unwrap();
        catalog.begin_step();
        assert_eq!(catalog.refresh(&mut handle, "in").unwrap(), "hello");
        assert!(!catalog.subscription("in").unwrap().updated());
    }

    #[test]
    fn test_unknown_keys() {
        let config = federate(&["out"], &["in"]);
        let federation = mocks::Federation::new(mocks::Script::default());
        let mut handle = federation.connect(&config).unwrap();
        let mut catalog =
            Catalog::resolve(&config, &Role::Producer { message_size: 1 }).unwrap();
        assert!(matches!(
            catalog.refresh(&mut handle, "out"),
            Err(Error::UnknownSubscription(_))
        ));
        assert!(matches!(
            catalog.publish(&mut handle, "in", "x".into()),
            Err(Error::UnknownPublication(_))
        ));
    }

    #[test]
    fn test_publish_caches_value() {
        let config = federate(&["out"], &[]);
        let federation = mocks::Federation::new(mocks::Script::default());
        let mut handle = federation.connect(&config).unwrap();
        let mut catalog =
            Catalog::resolve(&config, &Role::Producer { message_size: 1 }).unwrap();
        catalog.publish(&mut handle, "out", "abc".into()).unwrap();
        assert_eq!(catalog.publication("out").unwrap().last_value(), "abc");
        assert_eq!(
            federation.record().published,
            vec![(0.0, "out".to_string(), "abc".to_string())]
        );
    }
}
