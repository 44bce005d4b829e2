//! Serializable snapshot of a monitor's live state (Section B.1 of the
//! expanded design) — what an admin inspection surface would show, decoupled
//! from how that surface transports it.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BackendDiagnostics {
    pub name: String,
    pub status: u64,
    pub last_event: Option<String>,
    pub error_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorDiagnostics {
    pub name: String,
    pub state: String,
    pub tick_count: u64,
    pub backends: Vec<BackendDiagnostics>,
    /// Probe-specific key/value pairs (e.g. cluster UUID, cluster size).
    pub probe: Vec<(String, String)>,
}
