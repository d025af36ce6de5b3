//! Cache manager

pub mod service;

pub use service::{CacheManager, RefreshRequest};
