//! The monitor tick loop (§4, §4.5, C5).
//!
//! Runs on its own OS thread, one per monitor instance, matching the
//! teacher's one-thread-per-subsystem-worker model. `spawn` blocks the
//! caller on a rendezvous channel until the new thread has acknowledged
//! that it's initialized, giving `MonitorInstance::start` a synchronous
//! "the worker is up" guarantee without polling.

use crate::backend::{AdminRequest, BackendRecord};
use crate::collab::ProbeTransport;
use crate::journal::JournalRecord;
use crate::monitor::MonitorInstance;
use crate::status::{self, MonitorEvent, StatusBits};
use std::sync::atomic::Ordering;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Base scheduling quantum: the tick loop never sleeps longer than this in
/// one go, so a `stop()` or an admin `check_flag` is noticed within 100ms
/// even when `monitor_interval` is much longer.
const BASE_QUANTUM: Duration = Duration::from_millis(100);

pub fn spawn(instance: Arc<MonitorInstance>, transport: Arc<dyn ProbeTransport>) -> std::io::Result<JoinHandle<()>> {
    let (ready_tx, ready_rx) = sync_channel::<()>(1);

    let handle = std::thread::Builder::new()
        .name(format!("monitor-{}", instance.name()))
        .spawn(move || {
            run(instance, transport, ready_tx);
        })?;

    // Block until the worker is about to enter the loop, or until it's gone
    // (thread panicked immediately). The permission self-test already ran
    // synchronously in `MonitorInstance::start` before this thread spawned.
    let _ = ready_rx.recv();
    Ok(handle)
}

fn run(instance: Arc<MonitorInstance>, transport: Arc<dyn ProbeTransport>, ready_tx: std::sync::mpsc::SyncSender<()>) {
    let _ = ready_tx.send(());

    let mut next_tick = Instant::now();
    while !instance.shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        let mut skip_sleep = false;
        if now >= next_tick || instance.check_flag.load(Ordering::Acquire) {
            run_one_tick(&instance, transport.as_ref());
            if instance.probe().immediate_tick_required() {
                // §4.5 step 8: the probe wants its next confirmation right
                // away rather than waiting out monitor_interval.
                next_tick = Instant::now();
                skip_sleep = true;
            } else {
                let interval = instance.settings.lock().monitor_interval;
                next_tick = Instant::now() + interval;
            }
        }
        if !skip_sleep {
            std::thread::sleep(BASE_QUANTUM.min(next_tick.saturating_duration_since(Instant::now()).max(Duration::from_millis(1))));
        }
    }
}

/// Runs exactly one tick: consumes pending admin requests, probes every
/// non-MAINT backend, classifies and dispatches events, writes the journal.
/// Grounded on `MonitorWorker::run_one_tick` in the original monitor core.
pub fn run_one_tick(instance: &MonitorInstance, transport: &dyn ProbeTransport) {
    let tick = instance.bump_tick();
    instance.check_flag.store(false, Ordering::Release);
    debug!(monitor = instance.name(), tick, "tick start");

    apply_admin_requests(instance);

    let settings = instance.settings.lock().clone();
    {
        let mut backends = instance.backends.lock();
        instance.probe().pre_tick(&backends);
        for backend in backends.iter_mut() {
            if backend.status.contains(StatusBits::MAINT) {
                continue;
            }
            instance.probe().update_server_status(backend, transport, &settings);
        }
        instance.probe().post_tick(&mut backends);
    }

    maybe_check_disk_space(instance, &settings, transport);
    dispatch_events(instance, &settings);
    write_journal(instance);

    debug!(monitor = instance.name(), tick, "tick end");
}

fn apply_admin_requests(instance: &MonitorInstance) {
    let mut backends = instance.backends.lock();
    for backend in backends.iter_mut() {
        match backend.admin_request.take() {
            AdminRequest::MaintOn => backend.status |= StatusBits::MAINT,
            AdminRequest::MaintOff => backend.status &= !StatusBits::MAINT,
            AdminRequest::DrainOn => backend.status |= StatusBits::BEING_DRAINED,
            AdminRequest::DrainOff => backend.status &= !StatusBits::BEING_DRAINED,
            AdminRequest::NoChange => {}
        }
    }
}

/// Disk-space sub-schedule (§4.5): runs the disk-space query for every
/// capable backend iff the `disk_space_checked` stopwatch's split exceeds
/// `disk_space_check_interval`, and resets the stopwatch whether or not the
/// query actually ran for any backend (matching `check_disk_space_this_tick`
/// in the original monitor core).
fn maybe_check_disk_space(instance: &MonitorInstance, settings: &crate::settings::MonitorSettings, transport: &dyn ProbeTransport) {
    if settings.disk_space_check_interval.is_zero() {
        return;
    }

    let mut checked_at = instance.disk_space_checked.lock();
    if checked_at.elapsed() <= settings.disk_space_check_interval {
        return;
    }
    *checked_at = Instant::now();
    drop(checked_at);

    let mut backends = instance.backends.lock();
    for backend in backends.iter_mut() {
        if backend.status.contains(StatusBits::MAINT) || !backend.can_update_disk_space() {
            continue;
        }
        let Some(handle) = backend.connection else { continue };

        let mut exhausted = false;
        for (path, max_percent) in &backend.disk_limits.0 {
            match transport.disk_usage_percent(handle, path) {
                Ok(used_percent) => {
                    if used_percent >= *max_percent {
                        warn!(
                            monitor = instance.name(), server = %backend.server_ref.name,
                            path, used_percent, max_percent, "disk-space threshold exceeded"
                        );
                        exhausted = true;
                    }
                }
                Err(crate::collab::TransportError::Other) => {
                    // Capability unsupported by this transport: stop asking (sticky).
                    backend.disk_check_ok = false;
                    break;
                }
                Err(_) => {}
            }
        }

        if exhausted {
            backend.status |= StatusBits::DISK_EXHAUSTED;
        } else {
            backend.status &= !StatusBits::DISK_EXHAUSTED;
        }
    }
}

fn dispatch_events(instance: &MonitorInstance, settings: &crate::settings::MonitorSettings) {
    let mut backends = instance.backends.lock();
    let mut transitions = Vec::new();
    for (idx, backend) in backends.iter_mut().enumerate() {
        if backend.status.contains(StatusBits::MAINT) {
            continue;
        }
        if !backend.status_changed() {
            continue;
        }
        let prev = backend.prev_status.expect("status_changed() implies prev_status is Some");
        if let Some(event) = status::classify_event(prev, backend.status) {
            backend.last_event = Some(event);
            backend.triggered_at = Some(Instant::now());
            transitions.push((idx, event));
        }
    }

    if transitions.is_empty() {
        return;
    }

    // §4.5 step 5: if both a master-down and a master-up/new-master fired in
    // this tick, log the "primary switch" notice exactly once, not once per
    // qualifying transition.
    let master_down_this_tick = transitions.iter().any(|(_, e)| e.is_master_down());
    let master_up_this_tick = transitions.iter().any(|(_, e)| e.is_master_up());
    if master_down_this_tick && master_up_this_tick {
        info!(monitor = instance.name(), "Master switch detected");
    }

    for (idx, event) in &transitions {
        let name = backends[*idx].server_ref.name.clone();
        info!(monitor = instance.name(), server = %name, event = event.name(), "backend event");

        if status::is_unusable_transition(*event) {
            instance.service_router().hangup_all(&name);
        }
    }

    let event_mask = settings.event_mask().unwrap_or_else(|_| status::all_events_mask());
    if let Some(script_template) = &settings.script {
        for (idx, event) in &transitions {
            if event_mask & status::event_bit(*event) == 0 {
                continue;
            }
            run_script(instance, settings, script_template, &backends, *idx, *event);
        }
    }
}

fn run_script(
    instance: &MonitorInstance,
    settings: &crate::settings::MonitorSettings,
    script_template: &str,
    backends: &[BackendRecord],
    idx: usize,
    event: MonitorEvent,
) {
    let backend = &backends[idx];
    let mut cmd = instance.external_command().allocate(script_template, settings.script_timeout);

    let parent = backends
        .iter()
        .find(|b| b.server_ref.node_id == backend.server_ref.master_id)
        .map(|b| b.server_ref.name.clone())
        .unwrap_or_default();
    let children = backends
        .iter()
        .filter(|b| b.server_ref.master_id == backend.server_ref.node_id)
        .map(|b| b.server_ref.name.clone())
        .collect::<Vec<_>>()
        .join(",");

    let node_list = join_names(backends, |_| true);
    let master_list = join_names(backends, |b| b.status.contains(StatusBits::MASTER));
    let slave_list = join_names(backends, |b| b.status.contains(StatusBits::SLAVE));
    let synced_list = join_names(backends, |b| b.status.contains(StatusBits::JOINED));
    let credentials = format!(
        "{}:{}",
        settings.monitor_user.as_deref().unwrap_or(""),
        settings.monitor_password.as_deref().unwrap_or("")
    );

    for (token, value) in [
        ("$INITIATOR", backend.server_ref.name.as_str()),
        ("$PARENT", parent.as_str()),
        ("$CHILDREN", children.as_str()),
        ("$EVENT", event.name()),
        ("$CREDENTIALS", credentials.as_str()),
        ("$NODELIST", node_list.as_str()),
        ("$LIST", node_list.as_str()),
        ("$MASTERLIST", master_list.as_str()),
        ("$SLAVELIST", slave_list.as_str()),
        ("$SYNCEDLIST", synced_list.as_str()),
    ] {
        if instance.external_command().matches(&cmd, token) {
            instance.external_command().substitute(&mut cmd, token, value);
        }
    }

    match instance.external_command().execute(&cmd) {
        Ok(0) => {}
        Ok(status) => warn!(monitor = instance.name(), server = %backend.server_ref.name, status, "event script exited non-zero"),
        Err(detail) => warn!(monitor = instance.name(), server = %backend.server_ref.name, %detail, "event script failed to run"),
    }
}

fn join_names(backends: &[BackendRecord], predicate: impl Fn(&BackendRecord) -> bool) -> String {
    backends
        .iter()
        .filter(|b| predicate(b))
        .map(|b| b.server_ref.name.clone())
        .collect::<Vec<_>>()
        .join(",")
}

fn write_journal(instance: &MonitorInstance) {
    let backends = instance.backends.lock();
    let mut records: Vec<JournalRecord> = backends
        .iter()
        .map(|b| JournalRecord::Server { name: b.server_ref.name.clone(), status: b.status })
        .collect();
    if let Some(primary) = backends.iter().find(|b| b.status.contains(StatusBits::MASTER)) {
        records.push(JournalRecord::Primary { name: primary.server_ref.name.clone() });
    }
    drop(backends);

    let prev_hash = *instance.journal_hash.lock();
    match crate::journal::store(instance.journal_path(), &records, prev_hash) {
        Ok(hash) => *instance.journal_hash.lock() = Some(hash),
        Err(err) => warn!(monitor = instance.name(), %err, "journal write failed"),
    }
}
