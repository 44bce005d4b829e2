//! A single monitor instance: its backend list, settings, and the control
//! surface admin operations call into (§3 "Monitor Instance", C4).
//!
//! The actual probe loop lives in [`crate::worker`]; this module owns the
//! state the worker reads and writes; and the add/remove/status-override API
//! that's safe to call concurrently with a running worker thread (§3
//! concurrency contract).

use crate::backend::{AdminRequest, BackendRecord, DiskSpaceLimits, ServerRef};
use crate::collab::{ExternalCommand, ProbeTransport, ServiceRouter};
use crate::diagnostics::{BackendDiagnostics, MonitorDiagnostics};
use crate::error::{MonitorError, Result};
use crate::probe::Probe;
use crate::settings::MonitorSettings;
use crate::status::StatusBits;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Running,
}

/// One configured monitor: a probe implementation, its backend list, and
/// the bookkeeping the worker thread needs across ticks.
pub struct MonitorInstance {
    name: String,
    /// Probe-kind tag (e.g. `"classic_replication"`), used by
    /// [`crate::registry::Registry::reactivate`] to match a deactivated
    /// instance back to the module that's asking for it (§3, §4.6).
    module: String,
    probe: Box<dyn Probe>,
    service_router: Arc<dyn ServiceRouter>,
    external_command: Arc<dyn ExternalCommand>,
    journal_path: PathBuf,
    pub(crate) settings: Mutex<MonitorSettings>,
    pub(crate) backends: Mutex<Vec<BackendRecord>>,
    state: Mutex<MonitorState>,
    /// `false` = logically deleted but still addressable for reactivation
    /// (§3 "Monitor Instance", §4.6 `reactivate`). A fresh instance starts
    /// active; only the registry flips this.
    pub(crate) active: AtomicBool,
    tick_counter: AtomicU64,
    pub(crate) journal_hash: Mutex<Option<[u8; 20]>>,
    /// Raised by an admin call that wants its effect observed sooner than
    /// the next scheduled tick; cleared by the worker at the top of a tick.
    pub(crate) check_flag: AtomicBool,
    pub(crate) shutdown: Arc<AtomicBool>,
    transport: Mutex<Option<Arc<dyn ProbeTransport>>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    /// Wall-time stopwatch gating the disk-space sub-schedule (§4.5): reset
    /// every tick regardless of whether the query ran.
    pub(crate) disk_space_checked: Mutex<std::time::Instant>,
}

impl MonitorInstance {
    pub fn new(
        name: String,
        module: String,
        settings: MonitorSettings,
        journal_path: PathBuf,
        probe: Box<dyn Probe>,
        service_router: Arc<dyn ServiceRouter>,
        external_command: Arc<dyn ExternalCommand>,
    ) -> Self {
        Self {
            name,
            module,
            probe,
            service_router,
            external_command,
            journal_path,
            settings: Mutex::new(settings),
            backends: Mutex::new(Vec::new()),
            state: Mutex::new(MonitorState::Stopped),
            active: AtomicBool::new(true),
            tick_counter: AtomicU64::new(0),
            journal_hash: Mutex::new(None),
            check_flag: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            transport: Mutex::new(None),
            worker_handle: Mutex::new(None),
            disk_space_checked: Mutex::new(std::time::Instant::now()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_counter.load(Ordering::Acquire)
    }

    pub(crate) fn bump_tick(&self) -> u64 {
        self.tick_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn probe(&self) -> &dyn Probe {
        self.probe.as_ref()
    }

    pub(crate) fn service_router(&self) -> &dyn ServiceRouter {
        self.service_router.as_ref()
    }

    pub(crate) fn external_command(&self) -> &dyn ExternalCommand {
        self.external_command.as_ref()
    }

    pub(crate) fn journal_path(&self) -> &PathBuf {
        &self.journal_path
    }

    pub fn has_backend(&self, server_name: &str) -> bool {
        self.backends.lock().iter().any(|b| b.server_ref.name == server_name)
    }

    /// Reconfigures settings. Only valid while stopped (§3 invariant: live
    /// settings changes are out of scope, matching the Non-goals).
    pub fn configure(&self, settings: MonitorSettings) -> Result<()> {
        if self.state() == MonitorState::Running {
            return Err(MonitorError::MonitorRunning(self.name.clone()));
        }
        *self.settings.lock() = settings;
        Ok(())
    }

    /// Adds a backend. Only valid while stopped — a monitor's backend list
    /// is fixed for the duration of a run (§3).
    pub fn add_server(&self, server_ref: ServerRef, disk_limits: DiskSpaceLimits) -> Result<()> {
        if self.state() == MonitorState::Running {
            return Err(MonitorError::MonitorRunning(self.name.clone()));
        }
        let name = server_ref.name.clone();
        let mut backends = self.backends.lock();
        if backends.iter().any(|b| b.server_ref.name == name) {
            return Err(MonitorError::ServerAlreadyMonitored(name, self.name.clone()));
        }
        backends.push(BackendRecord::new(server_ref, disk_limits));
        drop(backends);
        self.service_router.server_added(&self.name, &name);
        Ok(())
    }

    pub fn remove_server(&self, server_name: &str) -> Result<()> {
        if self.state() == MonitorState::Running {
            return Err(MonitorError::MonitorRunning(self.name.clone()));
        }
        let mut backends = self.backends.lock();
        let before = backends.len();
        backends.retain(|b| b.server_ref.name != server_name);
        if backends.len() == before {
            return Err(MonitorError::UnknownBackend(server_name.to_string()));
        }
        drop(backends);
        self.service_router.server_removed(&self.name, server_name);
        Ok(())
    }

    /// Sets status bits on a backend. While running, only MAINT and
    /// BEING_DRAINED may be set this way, and the change is queued through
    /// the backend's [`crate::backend::AdminSlot`] rather than applied
    /// immediately (§3, §4.4). While stopped, the bits are applied directly.
    pub fn set_server_status(&self, server_name: &str, bits: StatusBits) -> Result<()> {
        self.update_server_status(server_name, bits, true)
    }

    pub fn clear_server_status(&self, server_name: &str, bits: StatusBits) -> Result<()> {
        self.update_server_status(server_name, bits, false)
    }

    fn update_server_status(&self, server_name: &str, bits: StatusBits, setting: bool) -> Result<()> {
        let manual_mask = StatusBits::MAINT | StatusBits::BEING_DRAINED;
        let mut backends = self.backends.lock();
        let backend = backends
            .iter_mut()
            .find(|b| b.server_ref.name == server_name)
            .ok_or_else(|| MonitorError::UnknownBackend(server_name.to_string()))?;

        if self.state() == MonitorState::Stopped {
            if setting {
                backend.status |= bits;
            } else {
                backend.status &= !bits;
            }
            return Ok(());
        }

        if !manual_mask.contains(bits) {
            return Err(MonitorError::ConstraintViolation);
        }

        let request = match (bits, setting) {
            (b, true) if b == StatusBits::MAINT => AdminRequest::MaintOn,
            (b, false) if b == StatusBits::MAINT => AdminRequest::MaintOff,
            (b, true) if b == StatusBits::BEING_DRAINED => AdminRequest::DrainOn,
            (b, false) if b == StatusBits::BEING_DRAINED => AdminRequest::DrainOff,
            _ => return Err(MonitorError::ConstraintViolation),
        };
        let overwritten = backend.admin_request.post(request);
        drop(backends);
        if overwritten != AdminRequest::NoChange {
            tracing::warn!(
                monitor = %self.name, server = %server_name,
                "admin request overwritten before the worker consumed it"
            );
        }
        self.check_flag.store(true, Ordering::Release);
        Ok(())
    }

    /// Starts the worker thread. Removes a stale journal, runs the
    /// permission self-test against real connections, and only then spawns
    /// the worker, blocking until it has confirmed initialization (§3's
    /// start/stop handshake, §4.4). Fails without spawning anything if the
    /// permission check comes back negative for any backend.
    pub fn start(self: &Arc<Self>, transport: Arc<dyn ProbeTransport>) -> Result<()> {
        let mut state = self.state.lock();
        if *state == MonitorState::Running {
            return Ok(());
        }

        let max_age = self.settings.lock().journal_max_age;
        match crate::journal::remove_if_stale(self.journal_path(), max_age) {
            Ok(true) => info!(monitor = %self.name, "removed stale journal"),
            Ok(false) => {
                if let Ok(Some(records)) = crate::journal::load(self.journal_path(), max_age) {
                    self.seed_from_journal(&records);
                }
            }
            Err(err) => info!(monitor = %self.name, %err, "could not inspect journal, starting with empty state"),
        }

        let mut failure = None;
        for (server, result) in self.test_permissions(transport.as_ref()) {
            if let Err(detail) = result {
                failure.get_or_insert_with(|| format!("{server}: {detail}"));
            }
        }
        if let Some(detail) = failure {
            // Don't leave connections the self-test opened dangling on a
            // monitor that never actually starts.
            for backend in self.backends.lock().iter_mut() {
                if let Some(handle) = backend.connection.take() {
                    transport.close(handle);
                }
            }
            return Err(MonitorError::PermissionCheckFailed(self.name.clone(), detail));
        }

        *self.transport.lock() = Some(transport.clone());
        self.shutdown.store(false, Ordering::Release);

        let handle = crate::worker::spawn(Arc::clone(self), transport).map_err(|_| MonitorError::WorkerStartFailed(self.name.clone()))?;
        *self.worker_handle.lock() = Some(handle);
        *state = MonitorState::Running;
        Ok(())
    }

    fn seed_from_journal(&self, records: &[crate::journal::JournalRecord]) {
        let mut backends = self.backends.lock();
        for record in records {
            if let crate::journal::JournalRecord::Server { name, status } = record {
                if let Some(backend) = backends.iter_mut().find(|b| &b.server_ref.name == name) {
                    backend.status = *status;
                }
            }
        }
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == MonitorState::Stopped {
            return Ok(());
        }
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker_handle.lock().take() {
            let _ = handle.join();
        }
        for backend in self.backends.lock().iter_mut() {
            if let (Some(handle), Some(transport)) = (backend.connection.take(), self.transport.lock().clone()) {
                transport.close(handle);
            }
        }
        *state = MonitorState::Stopped;
        Ok(())
    }

    /// Runs [`Probe::has_sufficient_permissions`] against every non-MAINT
    /// backend, establishing a real connection to each one first (Section
    /// B.3 of the expanded design).
    pub fn test_permissions(&self, transport: &dyn ProbeTransport) -> Vec<(String, std::result::Result<(), String>)> {
        let settings = self.settings.lock().clone();
        self.backends
            .lock()
            .iter_mut()
            .filter(|b| !b.status.contains(StatusBits::MAINT))
            .map(|b| {
                let result = self.probe.has_sufficient_permissions(b, transport, &settings);
                (b.server_ref.name.clone(), result)
            })
            .collect()
    }

    pub fn diagnostics(&self) -> MonitorDiagnostics {
        let backends = self.backends.lock();
        MonitorDiagnostics {
            name: self.name.clone(),
            state: format!("{:?}", self.state()),
            tick_count: self.tick_count(),
            backends: backends
                .iter()
                .map(|b| BackendDiagnostics {
                    name: b.server_ref.name.clone(),
                    status: b.status.bits(),
                    last_event: b.last_event.map(|e| e.name().to_string()),
                    error_count: b.error_count,
                })
                .collect(),
            probe: self.probe.diagnostics(),
        }
    }

    /// Atomically writes a simple `key = value` persistence file describing
    /// this monitor's configuration, via temp-file-then-rename (§4.3's
    /// crash-safety discipline applied to config, not just the journal).
    pub fn serialize(&self, path: &PathBuf) -> Result<()> {
        let settings = self.settings.lock();
        let mut text = String::new();
        text.push_str(&format!("[monitor \"{}\"]\n", self.name));
        text.push_str(&format!("monitor_interval = \"{}ms\"\n", settings.monitor_interval.as_millis()));
        text.push_str(&format!("backend_connect_attempts = {}\n", settings.backend_connect_attempts));
        if let Some(script) = &settings.script {
            text.push_str(&format!("script = \"{script}\"\n"));
        }
        drop(settings);

        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(text.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
