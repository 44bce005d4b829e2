//! Synced-quorum cluster probe (§5 "synced cluster" variant, Section B.6).
//!
//! Grounded on the node bookkeeping in `galeramon.hh`: each node reports its
//! own cluster size and cluster UUID, and a node only counts as JOINED when
//! both its local state is "synced" and its view of the cluster size/UUID
//! agrees with what the probe last saw from the rest of the group. A node
//! whose UUID disagrees with the rest is a partitioned minority, not a
//! member, even if its own local status claims otherwise.

use crate::backend::BackendRecord;
use crate::collab::{Credentials, ProbeTimeouts, ProbeTransport};
use crate::probe::{Probe, ProbeDiagnostics};
use crate::settings::MonitorSettings;
use crate::status::StatusBits;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-node view reported by the last successful probe, keyed by backend
/// name. Used by `post_tick` to settle on the majority cluster UUID.
#[derive(Debug, Clone, Default)]
struct NodeView {
    cluster_size: u32,
    cluster_uuid: String,
    local_state_synced: bool,
}

#[derive(Debug, Default)]
pub struct SyncedQuorumProbe {
    pub credentials: Credentials,
    nodes: Mutex<HashMap<String, NodeView>>,
    majority_uuid: Mutex<Option<String>>,
}

impl SyncedQuorumProbe {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            nodes: Mutex::new(HashMap::new()),
            majority_uuid: Mutex::new(None),
        }
    }

    fn timeouts(settings: &MonitorSettings) -> ProbeTimeouts {
        ProbeTimeouts {
            connect: settings.backend_connect_timeout,
            read: settings.backend_read_timeout,
            write: settings.backend_write_timeout,
        }
    }
}

impl Probe for SyncedQuorumProbe {
    fn has_sufficient_permissions(&self, backend: &mut BackendRecord, transport: &dyn ProbeTransport, settings: &MonitorSettings) -> Result<(), String> {
        let connect_result = backend.ping_or_connect(transport, &self.credentials, Self::timeouts(settings), settings.backend_connect_attempts);
        if !connect_result.is_ok() {
            return Err(format!("{}: could not connect to test permissions ({connect_result:?})", backend.server_ref.name));
        }
        let handle = backend.connection.expect("connect_result.is_ok() implies a handle");
        transport
            .query(handle, "SHOW STATUS LIKE 'wsrep_local_state'")
            .map(|_| ())
            .map_err(|e| format!("{}: permission check failed: {e:?}", backend.server_ref.name))
    }

    fn update_server_status(&self, backend: &mut BackendRecord, transport: &dyn ProbeTransport, settings: &MonitorSettings) {
        backend.stash_current_status();

        let connect_result = backend.ping_or_connect(transport, &self.credentials, Self::timeouts(settings), settings.backend_connect_attempts);

        if !connect_result.is_ok() {
            backend.clear_pending(StatusBits::non_sticky());
            self.nodes.lock().remove(&backend.server_ref.name);
            backend.status = backend.pending_status;
            if backend.should_print_fail_status() {
                warn!(backend = %backend.server_ref.name, ?connect_result, "probe unreachable");
            }
            backend.error_count = backend.error_count.saturating_add(1);
            return;
        }

        let handle = backend.connection.expect("connect_result.is_ok() implies a handle");
        backend.error_count = 0;
        backend.clear_pending(StatusBits::non_sticky());
        backend.set_pending(StatusBits::RUNNING);

        let status_rows = transport.query(handle, "SHOW STATUS LIKE 'wsrep_%'").unwrap_or_default();
        let lookup = |key: &str| -> Option<String> {
            status_rows
                .iter()
                .flatten()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let local_state_synced = lookup("wsrep_local_state_comment").as_deref() == Some("Synced");
        let cluster_size: u32 = lookup("wsrep_cluster_size").and_then(|v| v.parse().ok()).unwrap_or(0);
        let cluster_uuid = lookup("wsrep_cluster_state_uuid").unwrap_or_default();

        self.nodes.lock().insert(
            backend.server_ref.name.clone(),
            NodeView { cluster_size, cluster_uuid, local_state_synced },
        );

        backend.status = backend.pending_status;
    }

    fn post_tick(&self, backends: &mut [BackendRecord]) {
        let nodes = self.nodes.lock();
        if nodes.is_empty() {
            return;
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for view in nodes.values() {
            if !view.cluster_uuid.is_empty() {
                *counts.entry(view.cluster_uuid.as_str()).or_insert(0) += 1;
            }
        }
        let majority = counts.into_iter().max_by_key(|(_, count)| *count).map(|(uuid, _)| uuid.to_owned());
        *self.majority_uuid.lock() = majority.clone();

        let Some(majority_uuid) = majority else { return };

        for backend in backends.iter_mut() {
            let Some(view) = nodes.get(&backend.server_ref.name) else { continue };
            let in_majority_partition = view.cluster_uuid == majority_uuid;
            if view.local_state_synced && in_majority_partition && view.cluster_size > 0 {
                backend.set_pending(StatusBits::JOINED);
                backend.status |= StatusBits::JOINED;
                debug!(backend = %backend.server_ref.name, cluster_size = view.cluster_size, "synced probe: joined");
            } else {
                backend.clear_pending(StatusBits::JOINED);
                backend.status &= !StatusBits::JOINED;
                if view.local_state_synced && !in_majority_partition {
                    warn!(backend = %backend.server_ref.name, "synced probe: partitioned minority view, not counted as joined");
                }
            }
        }
    }

    fn diagnostics(&self) -> ProbeDiagnostics {
        let mut out = Vec::new();
        if let Some(uuid) = self.majority_uuid.lock().clone() {
            out.push(("cluster_uuid".to_string(), uuid));
        }
        for (name, view) in self.nodes.lock().iter() {
            out.push((format!("{name}.cluster_size"), view.cluster_size.to_string()));
        }
        out
    }
}
