//! REST client for the learning platform backend

pub mod client;

pub use client::RestApiClient;
