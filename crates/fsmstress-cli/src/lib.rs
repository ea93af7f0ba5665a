//! Bundled stress target and built-in workloads for the `fsmstress` binary.

pub mod store;
pub mod workloads;

pub use store::{DocumentStore, StoreError, StoreResult};
pub use workloads::registry;
