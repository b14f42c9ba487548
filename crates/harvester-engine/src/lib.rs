//! Authenticated report extraction and delivery.
//!
//! A run restores a saved browser session, logs in when the session is no longer
//! valid, pulls the export from the first candidate page that yields one, then
//! hands it to the configured sinks. The whole flow is retried by
//! [`controller::RunController`], which emits exactly one [`record::RunRecord`].

pub mod acquisition;
pub mod auth;
pub mod backend;
pub mod config;
pub mod context;
pub mod controller;
pub mod delivery;
pub mod http;
pub mod locator;
pub mod record;
pub mod session;
pub mod storage;

pub use harvester_common::protocol;
