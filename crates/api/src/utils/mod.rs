//! Shared helpers for the context layer

pub mod logging;

pub use logging::{error_label, init_tracing, log_operation};
