//! External collaborators (§6) — the narrow interfaces the monitor core
//! calls out through. Concrete wire protocols, script execution, and
//! service-router wiring live outside this crate; these traits are the seam.

use std::time::Duration;

/// Opaque handle to a live probe connection, owned by a [`crate::backend::BackendRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle(pub u64);

/// Credentials used to authenticate a probe connection. A per-server
/// override (if the backend has its own monitor user) takes precedence over
/// the monitor-wide default; that precedence is the caller's responsibility,
/// not this struct's.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

/// Kinds of failure a probe transport can report. Distinct from
/// [`crate::error::MonitorError`] because these never propagate to a
/// caller — the worker loop folds them into backend status bits (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Refused,
    Timeout,
    AuthDenied,
    Other,
}

/// The probe transport collaborator (§6). `address` starting with `/` means
/// a socket path rather than a host; implementations should also try an
/// optional extra port as a fallback after the primary connect attempt
/// fails, per §6.
pub trait ProbeTransport: Send + Sync {
    fn connect(
        &self,
        address: &str,
        port: u16,
        extra_port: Option<u16>,
        credentials: &Credentials,
        timeouts: ProbeTimeouts,
    ) -> Result<ConnHandle, TransportError>;

    /// A cheap liveness check on an existing handle (e.g. a PING). Used by
    /// `ping_or_connect` before tearing down and reconnecting.
    fn ping(&self, handle: ConnHandle) -> Result<(), TransportError>;

    fn query(&self, handle: ConnHandle, statement: &str) -> Result<Vec<Vec<(String, String)>>, TransportError>;

    fn close(&self, handle: ConnHandle);

    /// Percent of disk used at `path` on the backend behind `handle` (§4.5's
    /// disk-space sub-schedule). The default reports the capability as
    /// unsupported so a backend whose transport can't answer this sets its
    /// sticky `disk_check_ok = false` and stops asking (§3 "Backend Record").
    fn disk_usage_percent(&self, handle: ConnHandle, path: &str) -> Result<u8, TransportError> {
        let _ = (handle, path);
        Err(TransportError::Other)
    }
}

/// A single external-command invocation handle (§6 `ExternalCommand`).
pub struct CommandHandle {
    pub argv: Vec<String>,
    pub timeout: Duration,
}

/// The external-command collaborator used to invoke failover scripts (§6).
pub trait ExternalCommand: Send + Sync {
    fn allocate(&self, cmdline: &str, timeout: Duration) -> CommandHandle {
        CommandHandle {
            argv: cmdline.split_whitespace().map(str::to_owned).collect(),
            timeout,
        }
    }

    /// True iff any argument of `cmd` contains `token`.
    fn matches(&self, cmd: &CommandHandle, token: &str) -> bool {
        cmd.argv.iter().any(|a| a.contains(token))
    }

    /// Replace every occurrence of `token` with `value` across `cmd`'s argv.
    fn substitute(&self, cmd: &mut CommandHandle, token: &str, value: &str) {
        for arg in &mut cmd.argv {
            if arg.contains(token) {
                *arg = arg.replace(token, value);
            }
        }
    }

    /// Runs the command. `Ok(status)` carries the process exit status (`0` =
    /// success); `Err` represents an internal failure to even launch it
    /// (negative-return semantics of §6, modeled as `Err` rather than a
    /// sentinel value).
    fn execute(&self, cmd: &CommandHandle) -> Result<i32, String>;
}

/// The service-router collaborator (§6): notified on server add/remove and
/// on loss-of-usability edges so it can drop client connections bound to a
/// backend that's no longer usable.
pub trait ServiceRouter: Send + Sync {
    fn server_added(&self, monitor: &str, server: &str);
    fn server_removed(&self, monitor: &str, server: &str);
    fn hangup_all(&self, server: &str);
}

/// A no-op [`ServiceRouter`] for tests and for monitors that don't need
/// live-connection management (e.g. a warm-standby instance).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullServiceRouter;

impl ServiceRouter for NullServiceRouter {
    fn server_added(&self, _monitor: &str, _server: &str) {}
    fn server_removed(&self, _monitor: &str, _server: &str) {}
    fn hangup_all(&self, _server: &str) {}
}

/// A no-op [`ExternalCommand`] for monitors configured without a script.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExternalCommand;

impl ExternalCommand for NullExternalCommand {
    fn execute(&self, _cmd: &CommandHandle) -> Result<i32, String> {
        Ok(0)
    }
}
