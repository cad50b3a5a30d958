//! Cluster lifecycle: port allocation, process launch, reachability, teardown.

mod handle;
mod launcher;
mod manager;
mod ports;

pub use handle::*;
pub use launcher::*;
pub use manager::*;
