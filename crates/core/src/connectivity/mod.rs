//! Network reachability

pub mod monitor;

pub use monitor::{ConnectivityMonitor, ListenerId};
