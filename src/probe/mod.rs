//! The pluggable per-backend probe (§5, C5 collaborator).
//!
//! A monitor owns exactly one `Probe` implementation, shared across every
//! backend it watches. `MonitorInstance::start` runs the permission
//! self-test once, synchronously, before the worker thread ever spawns; the
//! worker loop itself drives `pre_tick`/`update_server_status` (per backend,
//! skipping MAINT)/`post_tick` in that order, every monitor_interval.

pub mod classic;
pub mod synced;

use crate::backend::BackendRecord;
use crate::collab::ProbeTransport;
use crate::settings::MonitorSettings;

/// Diagnostic key/value pairs a probe wants surfaced alongside the generic
/// monitor [`crate::diagnostics::MonitorDiagnostics`] snapshot.
pub type ProbeDiagnostics = Vec<(String, String)>;

/// A cluster-topology probe: the thing that actually decides what MASTER,
/// SLAVE, JOINED, and NDB mean for a given backend family.
pub trait Probe: Send + Sync {
    /// One-time (or periodic, at the caller's discretion) check that the
    /// monitor user has the grants it needs. Takes `backend` mutably so it
    /// can establish a real connection itself via
    /// [`BackendRecord::ping_or_connect`] before issuing the check query; a
    /// probe that can't verify this cheaply should just return `Ok(())`.
    fn has_sufficient_permissions(&self, backend: &mut BackendRecord, transport: &dyn ProbeTransport, settings: &MonitorSettings) -> Result<(), String>;

    /// Runs once before the per-backend loop on a tick. Probes that need
    /// cross-backend context (e.g. "who is everyone else's primary right
    /// now") gather it here.
    fn pre_tick(&self, backends: &[BackendRecord]) {
        let _ = backends;
    }

    /// Probes `backend`, calling [`BackendRecord::set_pending`] /
    /// [`BackendRecord::clear_pending`] to describe what this tick observed.
    /// Never called for a backend currently under MAINT.
    fn update_server_status(&self, backend: &mut BackendRecord, transport: &dyn ProbeTransport, settings: &MonitorSettings);

    /// Runs once after every backend has been probed this tick. Used for
    /// cluster-wide bookkeeping that depends on the full picture (e.g.
    /// recomputing which node is primary once all individual states commit).
    fn post_tick(&self, backends: &mut [BackendRecord]) {
        let _ = backends;
    }

    /// True if this probe wants the next tick to run immediately rather
    /// than waiting out the configured interval (e.g. a topology change is
    /// suspected and needs instant confirmation).
    fn immediate_tick_required(&self) -> bool {
        false
    }

    fn diagnostics(&self) -> ProbeDiagnostics {
        Vec::new()
    }
}
