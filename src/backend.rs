//! Per-backend mutable state (§3, §4.1, C1).

use crate::collab::{Credentials, ProbeTimeouts, ProbeTransport, TransportError};
use crate::status::{self, MonitorEvent, StatusBits};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// Sentinel for "no previous tick observed yet" — distinguished from any real
/// bitmap because `prev_status` is an `Option` instead of a magic value.
pub type PrevStatus = Option<StatusBits>;

/// Operator intent, written by an admin thread and consumed by the worker at
/// the top of the next tick. At most one request is ever pending per
/// backend; a newer write silently replaces an unconsumed one ("latest
/// intent wins", the open question in §9 resolved in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdminRequest {
    NoChange = 0,
    MaintOn = 1,
    MaintOff = 2,
    DrainOn = 3,
    DrainOff = 4,
}

impl AdminRequest {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => AdminRequest::MaintOn,
            2 => AdminRequest::MaintOff,
            3 => AdminRequest::DrainOn,
            4 => AdminRequest::DrainOff,
            _ => AdminRequest::NoChange,
        }
    }
}

/// An atomic single-slot mailbox for [`AdminRequest`]. `exchange` implements
/// the at-most-once-consumption invariant (P6): the worker calls it once per
/// tick and gets back whatever was posted since the last call.
#[derive(Debug, Default)]
pub struct AdminSlot(AtomicU8);

impl AdminSlot {
    pub fn new() -> Self {
        Self(AtomicU8::new(AdminRequest::NoChange as u8))
    }

    /// Posts a new request, returning the previous (possibly unread) one.
    pub fn post(&self, req: AdminRequest) -> AdminRequest {
        AdminRequest::from_u8(self.0.swap(req as u8, Ordering::AcqRel))
    }

    /// Atomically reads and clears the slot. Used by the worker at the top
    /// of a tick.
    pub fn take(&self) -> AdminRequest {
        AdminRequest::from_u8(self.0.swap(AdminRequest::NoChange as u8, Ordering::AcqRel))
    }
}

/// Outcome of [`BackendRecord::ping_or_connect`] (§4.1, §7 `ProbeConnect`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResult {
    ExistingOk,
    NewConnOk,
    Refused,
    Timeout,
    AuthDenied,
}

impl ConnectResult {
    pub fn is_ok(self) -> bool {
        matches!(self, ConnectResult::ExistingOk | ConnectResult::NewConnOk)
    }
}

/// Per-path disk-space threshold, `*` meaning "any path not otherwise named".
#[derive(Debug, Clone)]
pub struct DiskSpaceLimits(pub Vec<(String, u8)>);

impl DiskSpaceLimits {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Opaque identity the core treats as a black box — name plus whatever a
/// service-router collaborator needs to route traffic. The core never
/// interprets `address`/`port` beyond passing them to `ProbeTransport` and
/// into script token substitution.
#[derive(Debug, Clone)]
pub struct ServerRef {
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Fallback port tried once the primary `port` connect attempt fails
    /// (§6 `ProbeTransport::connect`'s "extra port" parameter).
    pub extra_port: Option<u16>,
    /// Graph identity used to resolve `$PARENT`/`$CHILDREN` script tokens.
    pub node_id: i64,
    pub master_id: i64,
}

impl ServerRef {
    pub fn addr_port(&self) -> String {
        format!("[{}]:{}", self.address, self.port)
    }
}

/// One monitored database backend (§3 "Backend Record", C1).
pub struct BackendRecord {
    pub server_ref: ServerRef,
    pub status: StatusBits,
    pub prev_status: PrevStatus,
    pub pending_status: StatusBits,
    pub error_count: u32,
    pub admin_request: AdminSlot,
    pub disk_limits: DiskSpaceLimits,
    /// Sticky: once a capability probe reports "unsupported", stop asking.
    pub disk_check_ok: bool,
    pub last_event: Option<MonitorEvent>,
    pub triggered_at: Option<Instant>,
    /// Owned probe connection handle, opaque to the core beyond liveness
    /// checks performed through [`crate::collab::ProbeTransport`].
    pub connection: Option<crate::collab::ConnHandle>,
}

impl BackendRecord {
    pub fn new(server_ref: ServerRef, disk_limits: DiskSpaceLimits) -> Self {
        Self {
            server_ref,
            status: StatusBits::empty(),
            prev_status: None,
            pending_status: StatusBits::empty(),
            error_count: 0,
            admin_request: AdminSlot::new(),
            disk_limits,
            disk_check_ok: true,
            last_event: None,
            triggered_at: None,
            connection: None,
        }
    }

    /// Copies `status` into both `prev_status` and `pending_status`. Called
    /// at the top of each per-backend probe (§4.1).
    pub fn stash_current_status(&mut self) {
        self.prev_status = Some(self.status);
        self.pending_status = self.status;
    }

    pub fn set_pending(&mut self, bits: StatusBits) {
        self.pending_status |= bits;
    }

    pub fn clear_pending(&mut self, bits: StatusBits) {
        self.pending_status &= !bits;
    }

    /// True iff `prev_status` has been observed at least once and the
    /// restricted bits differ in a way §4.2 calls significant.
    pub fn status_changed(&self) -> bool {
        match self.prev_status {
            Some(prev) => status::is_significant_change(prev, self.status),
            None => false,
        }
    }

    /// True iff the current status is "down" and this is the first tick that
    /// observed it (used to gate first-failure-edge logging, §4.1/§7).
    pub fn should_print_fail_status(&self) -> bool {
        self.status.is_down() && self.error_count == 0
    }

    pub fn can_update_disk_space(&self) -> bool {
        self.disk_check_ok && (!self.disk_limits.is_empty())
    }

    /// If a cached connection exists and passes a lightweight liveness
    /// check, keeps it (`ExistingOk`). Otherwise tears it down and attempts
    /// up to `connect_attempts` fresh connections with the configured
    /// timeouts and credentials, distinguishing `Timeout` from `Refused` by
    /// whether cumulative elapsed time across all attempts has reached
    /// `timeouts.connect` (§4.1). On success the new handle is stashed on
    /// the record; on failure `self.connection` is left `None`.
    pub fn ping_or_connect(
        &mut self,
        transport: &dyn ProbeTransport,
        credentials: &Credentials,
        timeouts: ProbeTimeouts,
        connect_attempts: u32,
    ) -> ConnectResult {
        if let Some(handle) = self.connection {
            if transport.ping(handle).is_ok() {
                return ConnectResult::ExistingOk;
            }
            transport.close(handle);
            self.connection = None;
        }

        let extra_port = self.server_ref.extra_port;
        let attempts = connect_attempts.max(1);
        let started = Instant::now();
        let mut last_err = TransportError::Refused;

        for attempt in 0..attempts {
            match transport.connect(&self.server_ref.address, self.server_ref.port, extra_port, credentials, timeouts) {
                Ok(handle) => {
                    self.connection = Some(handle);
                    return ConnectResult::NewConnOk;
                }
                Err(TransportError::AuthDenied) => return ConnectResult::AuthDenied,
                Err(err) => {
                    last_err = err;
                    if attempt + 1 < attempts {
                        continue;
                    }
                }
            }
        }

        if last_err == TransportError::Timeout || started.elapsed() >= timeouts.connect {
            ConnectResult::Timeout
        } else {
            ConnectResult::Refused
        }
    }
}
