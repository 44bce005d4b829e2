//! Canonical backend status bits and the diff → event classifier (§4.2, C2).

use bitflags::bitflags;

bitflags! {
    /// 64-bit status bitmap of a single backend, as observed by the monitor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusBits: u64 {
        /// The backend answered the liveness probe this tick.
        const RUNNING          = 1 << 0;
        /// Under administrator-requested maintenance; never probed, never eventful.
        const MAINT            = 1 << 1;
        /// Draining: still routable for in-flight work, not for new connections.
        const BEING_DRAINED    = 1 << 2;
        /// Classic-replication primary.
        const MASTER           = 1 << 3;
        /// Classic-replication replica.
        const SLAVE            = 1 << 4;
        /// Synced-quorum cluster member, fully joined.
        const JOINED           = 1 << 5;
        /// Alternate cluster-membership role (non-quorum cluster variant).
        const NDB              = 1 << 6;
        /// Last probe failed authentication (credentials rejected).
        const AUTH_ERROR       = 1 << 7;
        /// Disk-space threshold exceeded on at least one checked path.
        const DISK_EXHAUSTED   = 1 << 8;
        /// Sticky: this backend was MASTER at some point and hasn't been told otherwise.
        const WAS_MASTER       = 1 << 9;
    }
}

impl StatusBits {
    /// {MASTER, SLAVE, JOINED, NDB} — the bits that describe a backend's *role*.
    pub const ROLE_TYPE_MASK: StatusBits = StatusBits::MASTER
        .union(StatusBits::SLAVE)
        .union(StatusBits::JOINED)
        .union(StatusBits::NDB);

    /// {RUNNING, MAINT} ∪ role-type bits — the bits the diff classifier looks at.
    pub const ALL_BITS_MASK: StatusBits = StatusBits::RUNNING
        .union(StatusBits::MAINT)
        .union(StatusBits::ROLE_TYPE_MASK);

    /// True iff this backend reported down on the last completed probe.
    pub fn is_down(self) -> bool {
        !self.contains(StatusBits::RUNNING)
    }

    /// Bits that survive a clear-on-probe-failure pass. Everything except the
    /// sticky WAS_MASTER flag, which is cleared only by specific promotion
    /// paths (§4.2).
    pub fn non_sticky() -> StatusBits {
        StatusBits::all() & !StatusBits::WAS_MASTER
    }
}

/// A named backend-role-transition event, emitted when §4.2's change
/// predicate holds for a backend between two ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorEvent {
    MasterDown,
    SlaveDown,
    SyncedDown,
    NdbDown,
    ServerDown,
    MasterUp,
    SlaveUp,
    SyncedUp,
    NdbUp,
    ServerUp,
    LostMaster,
    LostSlave,
    LostSynced,
    LostNdb,
    NewMaster,
    NewSlave,
    NewSynced,
    NewNdb,
}

impl MonitorEvent {
    /// Stable name, used both for logging and for the `$EVENT` script token.
    pub fn name(self) -> &'static str {
        match self {
            MonitorEvent::MasterDown => "master_down",
            MonitorEvent::SlaveDown => "slave_down",
            MonitorEvent::SyncedDown => "synced_down",
            MonitorEvent::NdbDown => "ndb_down",
            MonitorEvent::ServerDown => "server_down",
            MonitorEvent::MasterUp => "master_up",
            MonitorEvent::SlaveUp => "slave_up",
            MonitorEvent::SyncedUp => "synced_up",
            MonitorEvent::NdbUp => "ndb_up",
            MonitorEvent::ServerUp => "server_up",
            MonitorEvent::LostMaster => "lost_master",
            MonitorEvent::LostSlave => "lost_slave",
            MonitorEvent::LostSynced => "lost_synced",
            MonitorEvent::LostNdb => "lost_ndb",
            MonitorEvent::NewMaster => "new_master",
            MonitorEvent::NewSlave => "new_slave",
            MonitorEvent::NewSynced => "new_synced",
            MonitorEvent::NewNdb => "new_ndb",
        }
    }

    pub fn is_master_down(self) -> bool {
        matches!(self, MonitorEvent::MasterDown)
    }

    pub fn is_master_up(self) -> bool {
        matches!(self, MonitorEvent::MasterUp | MonitorEvent::NewMaster)
    }
}

/// Bitmask of events, used for the monitor's configured `events` setting
/// (only events inside the mask get a script dispatch, §4.5 step 4).
pub type EventMask = u32;

/// Returns the bit this event occupies in an [`EventMask`]. Order matches the
/// family/priority ordering in §4.2 so a mask built from a contiguous range
/// of `1 << n` reads naturally in configuration.
pub fn event_bit(event: MonitorEvent) -> EventMask {
    1 << (event as u8)
}

/// Every event this classifier can emit, in declaration order — the set a
/// monitor's `events` setting (§6) is resolved against.
pub const ALL_EVENTS: &[MonitorEvent] = &[
    MonitorEvent::MasterDown,
    MonitorEvent::SlaveDown,
    MonitorEvent::SyncedDown,
    MonitorEvent::NdbDown,
    MonitorEvent::ServerDown,
    MonitorEvent::MasterUp,
    MonitorEvent::SlaveUp,
    MonitorEvent::SyncedUp,
    MonitorEvent::NdbUp,
    MonitorEvent::ServerUp,
    MonitorEvent::LostMaster,
    MonitorEvent::LostSlave,
    MonitorEvent::LostSynced,
    MonitorEvent::LostNdb,
    MonitorEvent::NewMaster,
    MonitorEvent::NewSlave,
    MonitorEvent::NewSynced,
    MonitorEvent::NewNdb,
];

/// True iff an event that "no longer usable" (§4.5 step 6) applies to: the
/// backend went down, or lost its cluster-membership role type while still
/// running. Drives the `hangup_all` collaborator call, not just the `*_down`
/// family.
pub fn is_unusable_transition(event: MonitorEvent) -> bool {
    matches!(
        event,
        MonitorEvent::MasterDown
            | MonitorEvent::SlaveDown
            | MonitorEvent::SyncedDown
            | MonitorEvent::NdbDown
            | MonitorEvent::ServerDown
            | MonitorEvent::LostMaster
            | MonitorEvent::LostSlave
            | MonitorEvent::LostSynced
            | MonitorEvent::LostNdb
    )
}

/// An all-bits-set mask covering every event in [`ALL_EVENTS`] — the default
/// when a monitor's `events` setting is unset (§6): dispatch everything.
pub fn all_events_mask() -> EventMask {
    ALL_EVENTS.iter().fold(0, |acc, &e| acc | event_bit(e))
}

/// True iff a change between `prev` and `present`, restricted to
/// [`StatusBits::ALL_BITS_MASK`], is "significant" per §4.2's change
/// predicate: the bits actually differ, MAINT didn't flip in either
/// direction, and the backend is running (was or is now) rather than having
/// stayed down the whole time. Grounded directly on `MonitorServer::
/// status_changed` in the original monitor core, whose three-term `&&` this
/// mirrors term for term.
pub fn is_significant_change(prev: StatusBits, present: StatusBits) -> bool {
    let prev = prev & StatusBits::ALL_BITS_MASK;
    let present = present & StatusBits::ALL_BITS_MASK;

    prev != present
        && ((prev | present) & StatusBits::MAINT).is_empty()
        && (prev | present).contains(StatusBits::RUNNING)
}

/// Classifies the transition between two restricted status snapshots into a
/// single [`MonitorEvent`], per the priority order MASTER > SLAVE > JOINED >
/// NDB within each family (§4.2).
///
/// Returns `None` only when no role bit differentiates the transition; this
/// must never happen for a change [`is_significant_change`] accepted, and
/// callers in debug builds should treat a `None` here as a classifier bug.
pub fn classify_event(prev_raw: StatusBits, present: StatusBits) -> Option<MonitorEvent> {
    let prev = prev_raw & StatusBits::ALL_BITS_MASK;
    let present = present & StatusBits::ALL_BITS_MASK;

    let prev_running = prev.contains(StatusBits::RUNNING);
    let present_running = present.contains(StatusBits::RUNNING);

    if !prev_running && present_running {
        return Some(pick_up_event(prev_raw, present));
    }
    if prev_running && !present_running {
        return Some(pick_down_event(prev));
    }
    if !prev_running && !present_running {
        // Both down: no meaningful transition (guarded against by the
        // significance predicate, but stay total rather than panic).
        return None;
    }

    // Both running: compare the master/slave subset to tell a role *loss*
    // from a role *gain*.
    let p = prev & (StatusBits::MASTER | StatusBits::SLAVE);
    let q = present & (StatusBits::MASTER | StatusBits::SLAVE);

    let still_have_role_type = !prev.intersection(StatusBits::ROLE_TYPE_MASK).is_empty();

    if !p.is_empty() && !q.is_empty() && p == q && still_have_role_type {
        return Some(pick_loss_event(prev));
    }

    if p.is_empty() || q.is_empty() || p != q {
        // We either lost role bits we had, or gained role bits we didn't.
        let lost = prev.intersection(StatusBits::ROLE_TYPE_MASK);
        let gained = present.intersection(StatusBits::ROLE_TYPE_MASK);
        if !lost.is_empty() && gained.is_empty() {
            return Some(pick_loss_event(prev));
        }
        if !gained.is_empty() {
            return Some(pick_new_event(present));
        }
    }

    None
}

/// A backend coming back up is a recovery (`*_UP`) only if `prev_raw` still
/// carries the sticky evidence that it held this role before going down
/// (only tracked for MASTER, via `WAS_MASTER`); otherwise it's this
/// backend's first time ever holding the role and counts as `NEW_*`, per the
/// cold-start scenario in §8.
fn pick_up_event(prev_raw: StatusBits, present: StatusBits) -> MonitorEvent {
    if present.contains(StatusBits::MASTER) {
        if prev_raw.contains(StatusBits::WAS_MASTER) {
            MonitorEvent::MasterUp
        } else {
            MonitorEvent::NewMaster
        }
    } else if present.contains(StatusBits::SLAVE) {
        MonitorEvent::NewSlave
    } else if present.contains(StatusBits::JOINED) {
        MonitorEvent::NewSynced
    } else if present.contains(StatusBits::NDB) {
        MonitorEvent::NewNdb
    } else {
        MonitorEvent::ServerUp
    }
}

fn pick_down_event(prev: StatusBits) -> MonitorEvent {
    if prev.contains(StatusBits::MASTER) {
        MonitorEvent::MasterDown
    } else if prev.contains(StatusBits::SLAVE) {
        MonitorEvent::SlaveDown
    } else if prev.contains(StatusBits::JOINED) {
        MonitorEvent::SyncedDown
    } else if prev.contains(StatusBits::NDB) {
        MonitorEvent::NdbDown
    } else {
        MonitorEvent::ServerDown
    }
}

fn pick_loss_event(prev: StatusBits) -> MonitorEvent {
    if prev.contains(StatusBits::MASTER) {
        MonitorEvent::LostMaster
    } else if prev.contains(StatusBits::SLAVE) {
        MonitorEvent::LostSlave
    } else if prev.contains(StatusBits::JOINED) {
        MonitorEvent::LostSynced
    } else {
        MonitorEvent::LostNdb
    }
}

fn pick_new_event(present: StatusBits) -> MonitorEvent {
    if present.contains(StatusBits::MASTER) {
        MonitorEvent::NewMaster
    } else if present.contains(StatusBits::SLAVE) {
        MonitorEvent::NewSlave
    } else if present.contains(StatusBits::JOINED) {
        MonitorEvent::NewSynced
    } else {
        MonitorEvent::NewNdb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_master_and_slave_come_up() {
        let prev = StatusBits::empty();
        let master_present = StatusBits::RUNNING | StatusBits::MASTER;
        let slave_present = StatusBits::RUNNING | StatusBits::SLAVE;

        assert!(is_significant_change(prev, master_present));
        assert_eq!(classify_event(prev, master_present), Some(MonitorEvent::NewMaster));
        assert!(is_significant_change(prev, slave_present));
        assert_eq!(classify_event(prev, slave_present), Some(MonitorEvent::NewSlave));
    }

    #[test]
    fn primary_failure_is_master_down() {
        let prev = StatusBits::RUNNING | StatusBits::MASTER;
        let present = StatusBits::empty();
        assert!(is_significant_change(prev, present));
        assert_eq!(classify_event(prev, present), Some(MonitorEvent::MasterDown));
    }

    #[test]
    fn maintenance_transition_is_never_significant() {
        // Going into or out of MAINT must never register as a change, even
        // though the role bits also flip underneath it (P1).
        let prev = StatusBits::RUNNING | StatusBits::MASTER;
        let present = StatusBits::RUNNING | StatusBits::MAINT;
        assert!(!is_significant_change(prev, present));

        let prev2 = StatusBits::RUNNING | StatusBits::MAINT;
        let present2 = StatusBits::RUNNING | StatusBits::MASTER;
        assert!(!is_significant_change(prev2, present2));
    }

    #[test]
    fn down_to_down_is_never_significant() {
        let prev = StatusBits::empty();
        let present = StatusBits::AUTH_ERROR;
        assert!(!is_significant_change(prev, present));
    }

    #[test]
    fn losing_a_role_while_still_running_is_loss() {
        let prev = StatusBits::RUNNING | StatusBits::JOINED;
        let present = StatusBits::RUNNING;
        assert!(is_significant_change(prev, present));
        assert_eq!(classify_event(prev, present), Some(MonitorEvent::LostSynced));
    }

    #[test]
    fn master_to_slave_switch_is_a_loss_not_a_new() {
        // prev has MASTER, present has SLAVE: p={MASTER} q={SLAVE}, p != q,
        // we lost MASTER bits and gained SLAVE bits.
        let prev = StatusBits::RUNNING | StatusBits::MASTER;
        let present = StatusBits::RUNNING | StatusBits::SLAVE;
        assert!(is_significant_change(prev, present));
        // Both lost and gained role bits are nonempty; gained wins per the
        // "else if gained" branch ordering, which matches the classic
        // MaxScale rule: having gained a type we didn't have is a NEW event.
        assert_eq!(classify_event(prev, present), Some(MonitorEvent::NewSlave));
    }

    #[test]
    fn unchanged_status_has_no_event() {
        let s = StatusBits::RUNNING | StatusBits::MASTER;
        assert!(!is_significant_change(s, s));
    }

    #[test]
    fn master_recovering_from_a_known_prior_master_is_master_up_not_new() {
        // Down, but WAS_MASTER survived the failure-path clear: this backend
        // has held the role before, so coming back is a recovery, not new.
        let prev = StatusBits::WAS_MASTER;
        let present = StatusBits::RUNNING | StatusBits::MASTER | StatusBits::WAS_MASTER;
        assert_eq!(classify_event(prev, present), Some(MonitorEvent::MasterUp));
    }
}
