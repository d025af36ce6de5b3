//! Reachability probing

pub mod probe;

pub use probe::ReachabilityProbe;
