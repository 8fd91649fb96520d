//! Common building blocks for the swarm distributed compilation tools.
//!
//! The workspace splits into three binaries (the `swarm-cc` compiler
//! wrapper, the `swarmd` load-balancer daemon and the `swarm-top` fleet
//! viewer) that all share the pieces in this crate: the mutable argument
//! vector, the host registry, the SSH transport facade with its fitness
//! probe, and the shared-memory rendezvous the daemon answers placement
//! requests on.

pub mod args;
pub mod config;
pub mod errors;
pub mod hosts;
pub mod ipc;
pub mod logging;
pub mod shutdown;
pub mod ssh;

pub use errors::{Result, SwarmError};
