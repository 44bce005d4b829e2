//! Classic primary/replica topology probe (§5 "classic replication" variant).
//!
//! Grounded on the replication-status queries in `mysql_utils.cc` and the
//! master/slave role assignment in `MonitorServer::check_replication` from
//! the original monitor core: a backend reporting `read_only = 0` is treated
//! as a primary candidate; a backend with both replication threads running
//! against a known primary is a replica of it.

use crate::backend::{BackendRecord, ConnectResult};
use crate::collab::{Credentials, ProbeTimeouts, ProbeTransport};
use crate::probe::Probe;
use crate::settings::MonitorSettings;
use crate::status::StatusBits;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ClassicReplicationProbe {
    pub credentials: Credentials,
}

impl ClassicReplicationProbe {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn timeouts(settings: &MonitorSettings) -> ProbeTimeouts {
        ProbeTimeouts {
            connect: settings.backend_connect_timeout,
            read: settings.backend_read_timeout,
            write: settings.backend_write_timeout,
        }
    }
}

impl Probe for ClassicReplicationProbe {
    fn has_sufficient_permissions(&self, backend: &mut BackendRecord, transport: &dyn ProbeTransport, settings: &MonitorSettings) -> Result<(), String> {
        let connect_result = backend.ping_or_connect(transport, &self.credentials, Self::timeouts(settings), settings.backend_connect_attempts);
        if !connect_result.is_ok() {
            return Err(format!("{}: could not connect to test permissions ({connect_result:?})", backend.server_ref.name));
        }
        let handle = backend.connection.expect("connect_result.is_ok() implies a handle");
        transport
            .query(handle, "SHOW SLAVE STATUS")
            .map(|_| ())
            .map_err(|e| format!("{}: permission check failed: {e:?}", backend.server_ref.name))
    }

    fn update_server_status(&self, backend: &mut BackendRecord, transport: &dyn ProbeTransport, settings: &MonitorSettings) {
        backend.stash_current_status();

        let connect_result = backend.ping_or_connect(transport, &self.credentials, Self::timeouts(settings), settings.backend_connect_attempts);

        if !connect_result.is_ok() {
            backend.clear_pending(StatusBits::non_sticky());
            if connect_result == ConnectResult::AuthDenied {
                backend.set_pending(StatusBits::AUTH_ERROR);
            }
            // Commit before checking should_print_fail_status(): it reads
            // backend.status, and the edge it looks for is this tick's
            // outcome, not whatever status was current before this probe.
            backend.status = backend.pending_status;
            if backend.should_print_fail_status() {
                warn!(backend = %backend.server_ref.name, ?connect_result, "probe unreachable");
            }
            backend.error_count = backend.error_count.saturating_add(1);
            return;
        }

        backend.error_count = 0;
        backend.clear_pending(StatusBits::non_sticky());
        backend.set_pending(StatusBits::RUNNING);

        let handle = backend.connection.expect("connect_result.is_ok() implies a handle");

        let read_only = transport
            .query(handle, "SELECT @@read_only")
            .ok()
            .and_then(|rows| rows.first()?.first().map(|(_, v)| v.clone()))
            .map(|v| v != "0")
            .unwrap_or(true);

        let slave_status = transport.query(handle, "SHOW SLAVE STATUS").unwrap_or_default();
        let is_replicating = slave_status.first().is_some_and(|row| {
            let running = |key: &str| row.iter().any(|(k, v)| k == key && v == "Yes");
            running("Slave_IO_Running") && running("Slave_SQL_Running")
        });

        if is_replicating {
            backend.set_pending(StatusBits::SLAVE);
            debug!(backend = %backend.server_ref.name, "classic probe: replica");
        } else if !read_only {
            backend.set_pending(StatusBits::MASTER | StatusBits::WAS_MASTER);
            debug!(backend = %backend.server_ref.name, "classic probe: primary");
        }

        backend.status = backend.pending_status;
    }
}
