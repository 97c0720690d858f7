//! Decide what each publication emits on a step.

use crate::catalog::Catalog;
use rand::{distributions::Alphanumeric, Rng};

/// Behavior of a federate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Republish the latest value of the subscription each publication was derived from.
    Relay,
    /// Publish a fresh random alphanumeric string of `message_size` characters every step.
    Producer { message_size: usize },
}

impl Role {
    /// Returns the payload to publish under `key` for the current step.
    ///
    /// A relay publication with no matching subscription emits an empty string.
    pub fn payload<R: Rng>(&self, key: &str, catalog: &Catalog, rng: &mut R) -> String {
        match self {
            Role::Producer { message_size } => generate(rng, *message_size),
            Role::Relay => catalog
                .source(key)
                .map(|signal| signal.last_value().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Generate a string of `len` characters drawn uniformly from `[0-9A-Za-z]`.
pub fn generate<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}
