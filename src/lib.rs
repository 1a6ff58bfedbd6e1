//! Sitewatch - website availability monitoring.
//!
//! The checker probes a fixed list of HTTP(S) targets on a shared tick
//! and publishes every result to Kafka; the recorder consumes them and
//! stores them idempotently in SQLite.

pub mod bus;
pub mod config;
pub mod db;
pub mod domain;
pub mod logging;
pub mod probe;
pub mod scheduler;
pub mod signal;
