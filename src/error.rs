//! The error taxonomy for the monitor core (§7 of the design).
//!
//! Mirrors the flat, single-enum `thiserror` style the host proxy's own
//! error type uses: one enum, one `#[error(...)]` per variant, `Result`
//! aliases at call sites rather than bespoke per-module error types.

use thiserror::Error;

/// All fallible outcomes the monitor core can produce.
///
/// Probe and query failures are *not* represented here: they never abort a
/// tick, they're folded into backend status bits instead (§7 propagation
/// policy). This enum covers the failures that are reported back to a caller
/// (an admin operation, journal load/store, script dispatch).
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(
        "The server is monitored, so only the maintenance or being-drained status can be \
         set/cleared manually. Status was not modified."
    )]
    ConstraintViolation,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("journal corrupted: {0}")]
    JournalCorruption(String),

    #[error("journal I/O error: {0}")]
    JournalIo(#[from] std::io::Error),

    #[error("script '{script}' failed: {detail}")]
    ScriptFailure { script: String, detail: String },

    #[error("server '{0}' is already monitored by monitor '{1}'")]
    ServerAlreadyMonitored(String, String),

    #[error("monitor '{0}' is running; this operation requires it to be stopped")]
    MonitorRunning(String),

    #[error("no such backend '{0}' on this monitor")]
    UnknownBackend(String),

    #[error("no such monitor '{0}'")]
    UnknownMonitor(String),

    #[error("failed to start worker thread for monitor '{0}'")]
    WorkerStartFailed(String),

    #[error("monitor '{0}' failed its startup permission check: {1}")]
    PermissionCheckFailed(String, String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
