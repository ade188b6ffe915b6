//! Uptrail - lightweight HTTP availability monitor.
//!
//! Probes a fixed set of URLs on an interval, stores every result in SQLite
//! and alerts on up/down transitions and sustained high latency.

pub mod alerts;
pub mod config;
pub mod db;
pub mod guard;
pub mod heartbeat;
pub mod probe;
pub mod scheduler;
