//! Run federates against each other in a single process.
//!
//! Each federate is driven from its own thread and coordinates with its peers through a shared
//! [Federation]. Collective calls (entering initializing and executing mode) wait until the expected
//! number of federates has joined and reached the same mode. Time requests are granted
//! conservatively: no federate is granted a time before every active peer has asked to advance.
//!
//! When a federate reports an error, or is rejected on connect, every peer blocked in a collective
//! call or time request is released with [crate::Error::PeerFailed].

mod federation;

pub use federation::{Config, Federation, Handle, Published};
