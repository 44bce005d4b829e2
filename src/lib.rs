//! Periodic health-monitor core for a replicated database proxy.
//!
//! Probes each configured backend on an interval, classifies status
//! transitions into events, dispatches an external script on the events a
//! monitor is configured to care about, and persists backend status to a
//! crash-recoverable journal so a restart doesn't have to relearn the whole
//! cluster topology from scratch.
//!
//! This crate only signals events; it never arbitrates consensus or performs
//! automatic failover itself — that's left to whatever script or external
//! controller the operator wires up to the events this core emits.

pub mod backend;
pub mod collab;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod journal;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod settings;
pub mod status;
pub mod worker;

pub use backend::{BackendRecord, ServerRef};
pub use config::{bootstrap, load_and_start, start_all, AppConfig};
pub use error::{MonitorError, Result};
pub use monitor::{MonitorInstance, MonitorState};
pub use registry::Registry;
pub use status::{MonitorEvent, StatusBits};

/// Installs a `tracing-subscriber` `EnvFilter` subscriber as the global
/// default, defaulting to `default_filter` when `RUST_LOG` isn't set.
///
/// The library itself never calls this — it only emits `tracing` events, the
/// same library/binary split the teacher crate follows (`spineldb`'s library
/// doesn't install a subscriber either; `main.rs` does). This is a
/// convenience for a host binary or a test harness that wants the monitor
/// core's logs on stderr without hand-rolling the `EnvFilter` setup.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry().with(fmt::layer()).with(filter).try_init();
}
